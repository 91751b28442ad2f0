//! Root signatures and pipeline state objects.
//!
//! Binding slot `i` becomes one root parameter: a root CBV at `b{i}`, a
//! one-entry descriptor table at `t{i}`, or a static sampler at `s{i}`. The
//! constants slot becomes 32-bit root constants at `b0, space1`.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use windows::Win32::Graphics::Direct3D::{D3D_PRIMITIVE_TOPOLOGY, ID3DBlob};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::core::s;

use super::conversion::{
    alpha_blend, blend, blend_op, comparison_func, cull_mode, dxgi_format, fill_mode,
    input_classification, primitive_topology, static_sampler, topology_type, vertex_format,
    write_mask,
};
use super::resources::D3d12Shader;
use super::{D3d12Backend, Retired, hr_error};
use crate::backend::descriptor_heap::DescriptorHeapKind;
use crate::compiler::ROOT_CONSTANTS_SPACE;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    BindingSlot, FrontFace, InputRate, MAX_RENDER_TARGETS, PipelineStateDescriptor,
    ShaderDescriptor,
};

/// What a binding slot turned into in the root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RootSlot {
    Constants { parameter: u32 },
    ConstantBuffer { parameter: u32 },
    ShaderResource { parameter: u32 },
    /// Static samplers take no root parameter.
    Sampler,
}

/// Root parameter layout of `bindings`, without the native descriptions.
pub(super) fn root_slots(bindings: &[BindingSlot]) -> Vec<RootSlot> {
    let mut next = 0;
    bindings
        .iter()
        .map(|slot| {
            let parameter = next;
            let root = match slot {
                BindingSlot::Constants { .. } => RootSlot::Constants { parameter },
                BindingSlot::ConstantBuffer => RootSlot::ConstantBuffer { parameter },
                BindingSlot::ShaderResource => RootSlot::ShaderResource { parameter },
                BindingSlot::Sampler(_) => return RootSlot::Sampler,
            };
            next += 1;
            root
        })
        .collect()
}

fn serialize_root_signature(desc: &D3D12_ROOT_SIGNATURE_DESC) -> GraphicsResult<ID3DBlob> {
    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3D12SerializeRootSignature(
            desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut blob,
            Some(&mut errors),
        )
    };
    if let Err(e) = result {
        let message = errors
            .map(|errors| {
                // SAFETY: the blob owns `GetBufferSize()` bytes of text.
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        errors.GetBufferPointer().cast::<u8>(),
                        errors.GetBufferSize(),
                    )
                };
                String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
            })
            .unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::ResourceCreation(format!(
            "D3D12SerializeRootSignature: {message}"
        )));
    }
    blob.ok_or_else(|| {
        GraphicsError::ResourceCreation("D3D12SerializeRootSignature returned nothing".to_string())
    })
}

fn create_root_signature(
    device: &ID3D12Device,
    bindings: &[BindingSlot],
    slots: &[RootSlot],
    graphics: bool,
) -> GraphicsResult<ID3D12RootSignature> {
    // Ranges are referenced by pointer from the parameters and must not move.
    let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = (0..bindings.len() as u32)
        .map(|register| D3D12_DESCRIPTOR_RANGE {
            RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
            NumDescriptors: 1,
            BaseShaderRegister: register,
            RegisterSpace: 0,
            OffsetInDescriptorsFromTableStart: 0,
        })
        .collect();

    let mut parameters = Vec::new();
    let mut samplers = Vec::new();
    for (register, (binding, slot)) in bindings.iter().zip(slots).enumerate() {
        let register = register as u32;
        let anonymous = match (binding, slot) {
            (BindingSlot::Constants { num_values }, RootSlot::Constants { .. }) => {
                D3D12_ROOT_PARAMETER_0 {
                    Constants: D3D12_ROOT_CONSTANTS {
                        ShaderRegister: 0,
                        RegisterSpace: ROOT_CONSTANTS_SPACE as u32,
                        Num32BitValues: *num_values,
                    },
                }
            }
            (_, RootSlot::ConstantBuffer { .. }) => D3D12_ROOT_PARAMETER_0 {
                Descriptor: D3D12_ROOT_DESCRIPTOR {
                    ShaderRegister: register,
                    RegisterSpace: 0,
                },
            },
            (_, RootSlot::ShaderResource { .. }) => D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &ranges[register as usize],
                },
            },
            (BindingSlot::Sampler(state), _) => {
                samplers.push(static_sampler(state, register));
                continue;
            }
            _ => continue,
        };
        let parameter_type = match slot {
            RootSlot::Constants { .. } => D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            RootSlot::ConstantBuffer { .. } => D3D12_ROOT_PARAMETER_TYPE_CBV,
            _ => D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        };
        parameters.push(D3D12_ROOT_PARAMETER {
            ParameterType: parameter_type,
            Anonymous: anonymous,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        });
    }

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: if parameters.is_empty() {
            std::ptr::null()
        } else {
            parameters.as_ptr()
        },
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: if samplers.is_empty() {
            std::ptr::null()
        } else {
            samplers.as_ptr()
        },
        Flags: if graphics {
            D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
        } else {
            D3D12_ROOT_SIGNATURE_FLAG_NONE
        },
    };
    let blob = serialize_root_signature(&desc)?;
    // SAFETY: the blob owns `GetBufferSize()` bytes.
    let bytes = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize())
    };
    unsafe { device.CreateRootSignature(0, bytes) }
        .map_err(|e| hr_error("CreateRootSignature", e))
}

/// A pipeline state object with its root signature.
pub struct D3d12Pipeline {
    backend: Arc<D3d12Backend>,
    state: Option<ID3D12PipelineState>,
    root_signature: Option<ID3D12RootSignature>,
    slots: Vec<RootSlot>,
    topology: D3D_PRIMITIVE_TOPOLOGY,
    compute: bool,
    /// Stride of each vertex buffer slot according to the input layout.
    slot_strides: Vec<(u32, u32)>,
    descriptors: Vec<(DescriptorHeapKind, u32)>,
}

// SAFETY: pipeline states and root signatures are free-threaded.
unsafe impl Send for D3d12Pipeline {}
unsafe impl Sync for D3d12Pipeline {}

impl D3d12Pipeline {
    pub(super) fn new(
        backend: &Arc<D3d12Backend>,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<Self> {
        let sampler_slots: Vec<DescriptorHeapKind> = descriptor
            .bindings
            .iter()
            .filter(|slot| matches!(slot, BindingSlot::Sampler(_)))
            .map(|_| DescriptorHeapKind::Sampler)
            .collect();
        let descriptors = backend.descriptors().allocate(&sampler_slots)?;

        // From here on, `Drop` releases whatever was created.
        let mut pipeline = Self {
            backend: Arc::clone(backend),
            state: None,
            root_signature: None,
            slots: root_slots(&descriptor.bindings),
            topology: primitive_topology(descriptor.topology),
            compute: descriptor.is_compute(),
            slot_strides: descriptor
                .slot_strides()
                .into_iter()
                .map(|(slot, stride, _)| (slot, stride))
                .collect(),
            descriptors,
        };
        let root_signature = create_root_signature(
            backend.device(),
            &descriptor.bindings,
            &pipeline.slots,
            !pipeline.compute,
        )?;
        let state = if pipeline.compute {
            pipeline.create_compute(descriptor, &root_signature)?
        } else {
            pipeline.create_graphics(descriptor, &root_signature)?
        };
        pipeline.root_signature = Some(root_signature);
        pipeline.state = Some(state);
        log::trace!(
            "D3d12Backend: created {} pipeline {:?} ({} binding slots)",
            if pipeline.compute { "compute" } else { "graphics" },
            descriptor.label,
            descriptor.bindings.len()
        );
        Ok(pipeline)
    }

    fn shader(
        &self,
        shader: &Option<ShaderDescriptor>,
        what: &str,
    ) -> GraphicsResult<D3d12Shader> {
        let descriptor = shader.as_ref().ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("pipeline has no {what} shader"))
        })?;
        D3d12Shader::new(&self.backend, descriptor)
    }

    fn create_compute(
        &self,
        descriptor: &PipelineStateDescriptor,
        root_signature: &ID3D12RootSignature,
    ) -> GraphicsResult<ID3D12PipelineState> {
        let shader = self.shader(&descriptor.compute_shader, "compute")?;
        let mut desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
            CS: shader.bytecode(),
            ..Default::default()
        };
        let state = unsafe { self.backend.device().CreateComputePipelineState(&desc) };
        unsafe { ManuallyDrop::drop(&mut desc.pRootSignature) };
        state.map_err(|e| hr_error("CreateComputePipelineState", e))
    }

    fn create_graphics(
        &self,
        descriptor: &PipelineStateDescriptor,
        root_signature: &ID3D12RootSignature,
    ) -> GraphicsResult<ID3D12PipelineState> {
        if descriptor.render_target_formats.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} render targets exceed the limit of {MAX_RENDER_TARGETS}",
                descriptor.render_target_formats.len()
            )));
        }
        let vertex = self.shader(&descriptor.vertex_shader, "vertex")?;
        let pixel = descriptor
            .pixel_shader
            .as_ref()
            .map(|shader| D3d12Shader::new(&self.backend, shader))
            .transpose()?;

        // Naga names vertex inputs `LOC{n}` after their shader location,
        // which is the element's index in the layout.
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = descriptor
            .input_layout
            .iter()
            .enumerate()
            .map(|(location, element)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: s!("LOC"),
                SemanticIndex: location as u32,
                Format: vertex_format(element.format),
                InputSlot: element.slot,
                AlignedByteOffset: element.offset,
                InputSlotClass: input_classification(element.rate),
                InstanceDataStepRate: u32::from(element.rate == InputRate::PerInstance),
            })
            .collect();

        let blend_state = &descriptor.blend;
        let target_blend = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: blend_state.enabled.into(),
            LogicOpEnable: false.into(),
            SrcBlend: blend(blend_state.src_color),
            DestBlend: blend(blend_state.dst_color),
            BlendOp: blend_op(blend_state.color_op),
            SrcBlendAlpha: alpha_blend(blend_state.src_alpha),
            DestBlendAlpha: alpha_blend(blend_state.dst_alpha),
            BlendOpAlpha: blend_op(blend_state.alpha_op),
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: write_mask(blend_state.write_mask),
        };
        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        for (slot, format) in rtv_formats.iter_mut().zip(&descriptor.render_target_formats) {
            *slot = dxgi_format(*format);
        }

        let rasterizer = &descriptor.rasterizer;
        let depth = &descriptor.depth_stencil;
        let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
            VS: vertex.bytecode(),
            PS: pixel.as_ref().map(D3d12Shader::bytecode).unwrap_or_default(),
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [target_blend; 8],
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: fill_mode(rasterizer.fill_mode),
                CullMode: cull_mode(rasterizer.cull_mode),
                FrontCounterClockwise: (rasterizer.front_face == FrontFace::CounterClockwise)
                    .into(),
                DepthBias: rasterizer.depth_bias,
                DepthBiasClamp: 0.0,
                SlopeScaledDepthBias: 0.0,
                DepthClipEnable: rasterizer.depth_clip.into(),
                MultisampleEnable: (descriptor.sample_count > 1).into(),
                AntialiasedLineEnable: false.into(),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: (depth.depth_test && descriptor.depth_format.is_some()).into(),
                DepthWriteMask: if depth.depth_write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: comparison_func(depth.depth_compare),
                StencilEnable: false.into(),
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: if elements.is_empty() {
                    std::ptr::null()
                } else {
                    elements.as_ptr()
                },
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: topology_type(descriptor.topology),
            NumRenderTargets: descriptor.render_target_formats.len() as u32,
            RTVFormats: rtv_formats,
            DSVFormat: descriptor.depth_format.map(dxgi_format).unwrap_or(DXGI_FORMAT_UNKNOWN),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: descriptor.sample_count.max(1),
                Quality: descriptor.sample_quality,
            },
            ..Default::default()
        };
        let state = unsafe { self.backend.device().CreateGraphicsPipelineState(&desc) };
        unsafe { ManuallyDrop::drop(&mut desc.pRootSignature) };
        state.map_err(|e| hr_error("CreateGraphicsPipelineState", e))
    }

    pub(super) fn state(&self) -> GraphicsResult<&ID3D12PipelineState> {
        self.state
            .as_ref()
            .ok_or_else(|| GraphicsError::State("pipeline was released".to_string()))
    }

    pub(super) fn root_signature(&self) -> GraphicsResult<&ID3D12RootSignature> {
        self.root_signature
            .as_ref()
            .ok_or_else(|| GraphicsError::State("pipeline was released".to_string()))
    }

    pub(super) fn is_compute(&self) -> bool {
        self.compute
    }

    pub(super) fn topology(&self) -> D3D_PRIMITIVE_TOPOLOGY {
        self.topology
    }

    pub(super) fn slots(&self) -> &[RootSlot] {
        &self.slots
    }

    pub(super) fn slot_stride(&self, slot: u32) -> u32 {
        self.slot_strides
            .iter()
            .find(|(s, _)| *s == slot)
            .map_or(0, |(_, stride)| *stride)
    }
}

impl Drop for D3d12Pipeline {
    fn drop(&mut self) {
        if let (Some(state), Some(root_signature)) =
            (self.state.take(), self.root_signature.take())
        {
            self.backend.defer(Retired::Pipeline { state, root_signature });
        }
        if !self.descriptors.is_empty() {
            self.backend.defer(Retired::Descriptors(std::mem::take(&mut self.descriptors)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SamplerState;

    #[test]
    fn test_samplers_take_no_root_parameter() {
        let bindings = [
            BindingSlot::Constants { num_values: 4 },
            BindingSlot::Sampler(SamplerState::linear()),
            BindingSlot::ShaderResource,
            BindingSlot::ConstantBuffer,
        ];
        assert_eq!(
            root_slots(&bindings),
            vec![
                RootSlot::Constants { parameter: 0 },
                RootSlot::Sampler,
                RootSlot::ShaderResource { parameter: 1 },
                RootSlot::ConstantBuffer { parameter: 2 },
            ]
        );
    }
}
