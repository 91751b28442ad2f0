//! Shader front-end shared by every backend.
//!
//! Shaders are authored in WGSL. Each [`ShaderDescriptor`] is parsed and
//! validated with naga, after which the Vulkan backend lowers it to SPIR-V and
//! the Direct3D 12 backend to HLSL for `D3DCompile`.
//!
//! Resource bindings follow one convention on every backend: WGSL
//! `@group(0) @binding(i)` is pipeline binding slot `i` (SPIR-V set 0 binding
//! `i`, HLSL register `b`/`t`/`s` `i` in space 0), and the single
//! `var<push_constant>` block maps to Vulkan push constants or HLSL root
//! constants at `b0, space1`.

use naga::back::{hlsl, spv};
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{ShaderDescriptor, ShaderStage};

/// SPIR-V version used when a profile does not name one.
pub const DEFAULT_SPIRV_VERSION: (u8, u8) = (1, 3);

/// HLSL register space holding the root constants.
pub const ROOT_CONSTANTS_SPACE: u8 = 1;

/// A parsed and validated shader module with one selected entry point.
#[derive(Debug)]
pub struct ShaderModule {
    module: naga::Module,
    info: ModuleInfo,
    stage: ShaderStage,
    entry_point: String,
    entry_index: usize,
}

fn naga_stage(stage: ShaderStage) -> GraphicsResult<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Ok(naga::ShaderStage::Vertex),
        ShaderStage::Pixel => Ok(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Ok(naga::ShaderStage::Compute),
        ShaderStage::Geometry | ShaderStage::Hull | ShaderStage::Domain => {
            Err(GraphicsError::Compilation {
                stage,
                diagnostic: "stage is not supported by the WGSL front-end".to_string(),
            })
        }
    }
}

/// Parse and validate `descriptor.source` and locate its entry point.
pub fn compile(descriptor: &ShaderDescriptor) -> GraphicsResult<ShaderModule> {
    crate::profile_scope!("compile_shader");

    let stage = descriptor.stage;
    let target_stage = naga_stage(stage)?;
    let compilation = |diagnostic: String| GraphicsError::Compilation { stage, diagnostic };

    let module = naga::front::wgsl::parse_str(&descriptor.source)
        .map_err(|e| compilation(e.emit_to_string(&descriptor.source)))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|e| compilation(e.emit_to_string(&descriptor.source)))?;

    let entry_index = module
        .entry_points
        .iter()
        .position(|ep| ep.name == descriptor.entry_point && ep.stage == target_stage)
        .ok_or_else(|| {
            compilation(format!(
                "entry point '{}' not found for stage {:?}",
                descriptor.entry_point, stage
            ))
        })?;

    Ok(ShaderModule {
        module,
        info,
        stage,
        entry_point: descriptor.entry_point.clone(),
        entry_index,
    })
}

/// SPIR-V version requested by a `spirv_<major>_<minor>` profile.
///
/// An empty profile, or one meant for another backend (`vs_5_1`), selects
/// [`DEFAULT_SPIRV_VERSION`].
pub fn spirv_version(stage: ShaderStage, profile: &str) -> GraphicsResult<(u8, u8)> {
    let Some(version) = profile.strip_prefix("spirv_") else {
        return Ok(DEFAULT_SPIRV_VERSION);
    };
    let invalid = || GraphicsError::Compilation {
        stage,
        diagnostic: format!("invalid SPIR-V profile '{profile}'"),
    };
    let (major, minor) = version.split_once('_').ok_or_else(invalid)?;
    let major: u8 = major.parse().map_err(|_| invalid())?;
    let minor: u8 = minor.parse().map_err(|_| invalid())?;
    if major != 1 || minor > 6 {
        return Err(invalid());
    }
    Ok((major, minor))
}

/// HLSL target profile for `D3DCompile`, derived from the stage when empty
/// or when the profile names a SPIR-V version.
pub fn hlsl_profile(stage: ShaderStage, profile: &str) -> String {
    if profile.is_empty() || profile.starts_with("spirv_") {
        format!("{}_5_1", stage.profile_prefix())
    } else {
        profile.to_string()
    }
}

impl ShaderModule {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Naga module, for reflection.
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    /// Size in bytes of the push constant block, if the module declares one.
    pub fn push_constant_size(&self) -> Option<u32> {
        self.module.global_variables.iter().find_map(|(_, var)| {
            (var.space == naga::AddressSpace::PushConstant)
                .then(|| self.module.types[var.ty].inner.size(self.module.to_ctx()))
        })
    }

    /// Lower to SPIR-V words for `vkCreateShaderModule`.
    ///
    /// Clip-space Y is flipped so that the same viewport produces the same
    /// image as the Direct3D 12 backend.
    pub fn to_spirv(&self, version: (u8, u8)) -> GraphicsResult<Vec<u32>> {
        let options = spv::Options {
            lang_version: version,
            flags: spv::WriterFlags::ADJUST_COORDINATE_SPACE | spv::WriterFlags::LABEL_VARYINGS,
            capabilities: None,
            bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
            binding_map: Default::default(),
            debug_info: None,
            zero_initialize_workgroup_memory: spv::ZeroInitializeWorkgroupMemoryMode::None,
        };
        let pipeline_options = spv::PipelineOptions {
            shader_stage: self.module.entry_points[self.entry_index].stage,
            entry_point: self.entry_point.clone(),
        };
        spv::write_vec(&self.module, &self.info, &options, Some(&pipeline_options)).map_err(|e| {
            GraphicsError::Compilation {
                stage: self.stage,
                diagnostic: format!("SPIR-V generation error: {e}"),
            }
        })
    }

    /// Lower to HLSL source. Returns the source and the name of the selected
    /// entry point in it.
    pub fn to_hlsl(&self) -> GraphicsResult<(String, String)> {
        let options = hlsl::Options {
            shader_model: hlsl::ShaderModel::V5_1,
            fake_missing_bindings: true,
            push_constants_target: Some(hlsl::BindTarget {
                space: ROOT_CONSTANTS_SPACE,
                register: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let error = |diagnostic: String| GraphicsError::Compilation {
            stage: self.stage,
            diagnostic,
        };

        let mut source = String::new();
        let reflection = hlsl::Writer::new(&mut source, &options)
            .write(&self.module, &self.info, None)
            .map_err(|e| error(format!("HLSL generation error: {e}")))?;
        let entry_name = reflection
            .entry_point_names
            .into_iter()
            .nth(self.entry_index)
            .ok_or_else(|| error("entry point missing from HLSL output".to_string()))?
            .map_err(|e| error(format!("HLSL entry point error: {e}")))?;
        Ok((source, entry_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}

@fragment
fn ps_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

    #[test]
    fn test_compile_finds_entry_point() {
        let module = compile(&ShaderDescriptor::vertex(TRIANGLE, "vs_main")).unwrap();
        assert_eq!(module.stage(), ShaderStage::Vertex);
        assert_eq!(module.entry_point(), "vs_main");
        assert_eq!(module.push_constant_size(), None);
    }

    #[test]
    fn test_entry_point_stage_must_match() {
        let err = compile(&ShaderDescriptor::pixel(TRIANGLE, "vs_main")).unwrap_err();
        assert!(matches!(err, GraphicsError::Compilation { stage: ShaderStage::Pixel, .. }));
    }

    #[test]
    fn test_syntax_error_reports_diagnostic() {
        let err = compile(&ShaderDescriptor::pixel("fn broken( {", "main")).unwrap_err();
        match err {
            GraphicsError::Compilation { diagnostic, .. } => assert!(!diagnostic.is_empty()),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_geometry_stage_is_rejected() {
        let desc = ShaderDescriptor::new(ShaderStage::Geometry, TRIANGLE, "vs_main");
        assert!(matches!(compile(&desc), Err(GraphicsError::Compilation { .. })));
    }

    #[test]
    fn test_spirv_output_has_magic_number() {
        let module = compile(&ShaderDescriptor::vertex(TRIANGLE, "vs_main")).unwrap();
        let words = module.to_spirv(DEFAULT_SPIRV_VERSION).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn test_spirv_profile_parsing() {
        let stage = ShaderStage::Vertex;
        assert_eq!(spirv_version(stage, ""), Ok((1, 3)));
        assert_eq!(spirv_version(stage, "spirv_1_5"), Ok((1, 5)));
        assert_eq!(spirv_version(stage, "vs_5_1"), Ok((1, 3)));
        assert!(spirv_version(stage, "spirv_2_0").is_err());
        assert!(spirv_version(stage, "spirv_x").is_err());
    }

    #[test]
    fn test_hlsl_profile_defaults() {
        assert_eq!(hlsl_profile(ShaderStage::Pixel, ""), "ps_5_1");
        assert_eq!(hlsl_profile(ShaderStage::Compute, "cs_5_0"), "cs_5_0");
        assert_eq!(hlsl_profile(ShaderStage::Vertex, "spirv_1_3"), "vs_5_1");
    }

    #[test]
    fn test_hlsl_uses_location_semantics() {
        let module = compile(&ShaderDescriptor::vertex(TRIANGLE, "vs_main")).unwrap();
        let (source, entry) = module.to_hlsl().unwrap();
        assert_eq!(entry, "vs_main");
        assert!(source.contains("LOC0"));
    }

    #[test]
    fn test_hlsl_pixel_and_compute_entry_points() {
        let module = compile(&ShaderDescriptor::pixel(TRIANGLE, "ps_main")).unwrap();
        let (source, entry) = module.to_hlsl().unwrap();
        assert_eq!(entry, "ps_main");
        assert!(source.contains("SV_Target0"));

        let compute = r#"
@group(0) @binding(0) var<uniform> scale: vec4<f32>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let unused = scale * f32(id.x);
}
"#;
        let module =
            compile(&ShaderDescriptor::new(ShaderStage::Compute, compute, "cs_main")).unwrap();
        let (source, entry) = module.to_hlsl().unwrap();
        assert_eq!(entry, "cs_main");
        assert!(source.contains("[numthreads(8, 8, 1)]"));
        assert!(source.contains("register(b0)"));
    }

    #[test]
    fn test_push_constant_size_reflection() {
        let source = r#"
struct Constants { scale: vec4<f32>, tint: vec4<f32> }
var<push_constant> constants: Constants;

@fragment
fn main() -> @location(0) vec4<f32> {
    return constants.scale * constants.tint;
}
"#;
        let module = compile(&ShaderDescriptor::pixel(source, "main")).unwrap();
        assert_eq!(module.push_constant_size(), Some(32));
    }
}
