//! Pipeline state objects.
//!
//! Binding slot `i` becomes binding `i` of descriptor set 0. The constants
//! slot becomes a push constant range. Viewports, scissors and vertex
//! strides are dynamic state, so one pipeline serves any render target size
//! and any vertex buffer stride.

use std::sync::Arc;

use ash::vk;

use super::conversion::{
    blend_factor, blend_op, color_writes, compare_op, cull_mode, front_face, input_rate,
    polygon_mode, sampler_create_info, topology, vertex_format,
};
use super::deferred::DeferredResource;
use super::resources::VulkanShader;
use super::{VulkanBackend, vk_error};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{BindingSlot, PipelineStateDescriptor, ShaderDescriptor};

const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT_WITH_COUNT,
    vk::DynamicState::SCISSOR_WITH_COUNT,
    vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE,
];

/// Descriptor type of each binding slot; `None` for the constants slot.
fn slot_descriptor_types(bindings: &[BindingSlot]) -> Vec<Option<vk::DescriptorType>> {
    bindings
        .iter()
        .map(|slot| match slot {
            BindingSlot::Constants { .. } => None,
            BindingSlot::ConstantBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
            BindingSlot::ShaderResource => Some(vk::DescriptorType::SAMPLED_IMAGE),
            BindingSlot::Sampler(_) => Some(vk::DescriptorType::SAMPLER),
        })
        .collect()
}

/// A graphics or compute pipeline with its layout.
pub struct VulkanPipeline {
    backend: Arc<VulkanBackend>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    samplers: Vec<vk::Sampler>,
    bind_point: vk::PipelineBindPoint,
    stages: vk::ShaderStageFlags,
    slot_types: Vec<Option<vk::DescriptorType>>,
    /// Stride of each vertex buffer slot according to the input layout.
    slot_strides: Vec<(u32, u32)>,
}

impl VulkanPipeline {
    pub(super) fn new(
        backend: &Arc<VulkanBackend>,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<Self> {
        let (bind_point, stages) = if descriptor.is_compute() {
            (vk::PipelineBindPoint::COMPUTE, vk::ShaderStageFlags::COMPUTE)
        } else {
            (
                vk::PipelineBindPoint::GRAPHICS,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
        };
        // Null handles are valid to destroy, so a partially built pipeline is
        // released by `Drop` when a later step fails.
        let mut pipeline = Self {
            backend: Arc::clone(backend),
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            samplers: Vec::new(),
            bind_point,
            stages,
            slot_types: slot_descriptor_types(&descriptor.bindings),
            slot_strides: descriptor
                .slot_strides()
                .into_iter()
                .map(|(slot, stride, _)| (slot, stride))
                .collect(),
        };
        pipeline.create_layout(descriptor)?;
        pipeline.pipeline = if descriptor.is_compute() {
            pipeline.create_compute(descriptor)?
        } else {
            pipeline.create_graphics(descriptor)?
        };
        log::trace!(
            "VulkanBackend: created {:?} pipeline {:?} ({} binding slots)",
            bind_point,
            descriptor.label,
            descriptor.bindings.len()
        );
        Ok(pipeline)
    }

    fn create_layout(&mut self, descriptor: &PipelineStateDescriptor) -> GraphicsResult<()> {
        let device = self.backend.device();

        for slot in &descriptor.bindings {
            if let BindingSlot::Sampler(state) = slot {
                let sampler = unsafe { device.create_sampler(&sampler_create_info(state), None) }
                    .map_err(|e| vk_error("vkCreateSampler", e))?;
                self.samplers.push(sampler);
            }
        }

        let mut samplers = self.samplers.iter();
        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = self
            .slot_types
            .iter()
            .enumerate()
            .filter_map(|(index, ty)| ty.map(|ty| (index as u32, ty)))
            .map(|(index, ty)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(index)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(self.stages);
                // Sampler slots take the samplers in creation order.
                if ty == vk::DescriptorType::SAMPLER
                    && let Some(sampler) = samplers.next()
                {
                    binding.immutable_samplers(std::slice::from_ref(sampler))
                } else {
                    binding
                }
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        self.set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }
            .map_err(|e| vk_error("vkCreateDescriptorSetLayout", e))?;

        let push_constants: Vec<vk::PushConstantRange> = descriptor
            .constants_slot()
            .map(|(_, num_values)| vk::PushConstantRange {
                stage_flags: self.stages,
                offset: 0,
                size: num_values * 4,
            })
            .into_iter()
            .collect();
        let set_layouts = [self.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        self.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| vk_error("vkCreatePipelineLayout", e))?;
        Ok(())
    }

    fn shader(
        &self,
        shader: &Option<ShaderDescriptor>,
        what: &str,
    ) -> GraphicsResult<VulkanShader> {
        let descriptor = shader.as_ref().ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("pipeline has no {what} shader"))
        })?;
        VulkanShader::new(&self.backend, descriptor)
    }

    fn create_compute(&self, descriptor: &PipelineStateDescriptor) -> GraphicsResult<vk::Pipeline> {
        let shader = self.shader(&descriptor.compute_shader, "compute")?;
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_info())
            .layout(self.layout);
        let pipelines = unsafe {
            self.backend
                .device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| vk_error("vkCreateComputePipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| {
                GraphicsError::ResourceCreation(
                    "vkCreateComputePipelines returned nothing".to_string(),
                )
            })
    }

    fn create_graphics(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<vk::Pipeline> {
        let vertex = self.shader(&descriptor.vertex_shader, "vertex")?;
        let pixel = descriptor
            .pixel_shader
            .as_ref()
            .map(|shader| VulkanShader::new(&self.backend, shader))
            .transpose()?;
        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> =
            std::iter::once(vertex.stage_info())
                .chain(pixel.as_ref().map(VulkanShader::stage_info))
                .collect();

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = descriptor
            .slot_strides()
            .into_iter()
            .map(|(slot, stride, rate)| vk::VertexInputBindingDescription {
                binding: slot,
                stride,
                input_rate: input_rate(rate),
            })
            .collect();
        // Shader location `i` is input element `i`.
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = descriptor
            .input_layout
            .iter()
            .enumerate()
            .map(|(location, element)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: element.slot,
                format: vertex_format(element.format),
                offset: element.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology(descriptor.topology));
        // Counts come from the dynamic state.
        let viewport = vk::PipelineViewportStateCreateInfo::default();

        let raster = &descriptor.rasterizer;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(polygon_mode(raster.fill_mode))
            .cull_mode(cull_mode(raster.cull_mode))
            .front_face(front_face(raster.front_face))
            .depth_clamp_enable(false)
            .depth_bias_enable(raster.depth_bias != 0)
            .depth_bias_constant_factor(raster.depth_bias as f32)
            .line_width(1.0);
        if !raster.depth_clip {
            log::debug!(
                "VulkanBackend: depth clip cannot be disabled, ignoring for {:?}",
                descriptor.label
            );
        }

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::from_raw(descriptor.sample_count.max(1)));

        let depth = &descriptor.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth.depth_test)
            .depth_write_enable(depth.depth_write)
            .depth_compare_op(compare_op(depth.depth_compare));

        let blend = &descriptor.blend;
        let attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(blend.enabled)
            .src_color_blend_factor(blend_factor(blend.src_color))
            .dst_color_blend_factor(blend_factor(blend.dst_color))
            .color_blend_op(blend_op(blend.color_op))
            .src_alpha_blend_factor(blend_factor(blend.src_alpha))
            .dst_alpha_blend_factor(blend_factor(blend.dst_alpha))
            .alpha_blend_op(blend_op(blend.alpha_op))
            .color_write_mask(color_writes(blend.write_mask));
        let attachments = vec![attachment; descriptor.render_target_formats.len()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let color_formats: Vec<vk::Format> = descriptor
            .render_target_formats
            .iter()
            .map(|format| self.backend.texture_format(*format))
            .collect();
        let depth_format = descriptor
            .depth_format
            .map(|format| self.backend.texture_format(format))
            .unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = match descriptor.depth_format {
            Some(format) if format.has_stencil() => depth_format,
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(self.layout)
            .push_next(&mut rendering);

        let pipelines = unsafe {
            self.backend
                .device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| vk_error("vkCreateGraphicsPipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| {
                GraphicsError::ResourceCreation(
                    "vkCreateGraphicsPipelines returned nothing".to_string(),
                )
            })
    }

    pub(super) fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub(super) fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(super) fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub(super) fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub(super) fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    pub(super) fn slot_type(&self, index: u32) -> Option<vk::DescriptorType> {
        self.slot_types.get(index as usize).copied().flatten()
    }

    /// Whether set 0 has any binding, immutable samplers included.
    pub(super) fn needs_descriptor_set(&self) -> bool {
        self.slot_types.iter().flatten().next().is_some()
    }

    pub(super) fn slot_stride(&self, slot: u32) -> u32 {
        self.slot_strides
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, stride)| *stride)
            .unwrap_or(0)
    }

    /// Number of descriptors of `ty` in set 0.
    pub(super) fn descriptor_count(&self, ty: vk::DescriptorType) -> u32 {
        self.slot_types.iter().filter(|t| **t == Some(ty)).count() as u32
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        self.backend.defer(DeferredResource::Pipeline {
            pipeline: self.pipeline,
            layout: self.layout,
            set_layout: self.set_layout,
            samplers: std::mem::take(&mut self.samplers),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SamplerState;

    #[test]
    fn test_constants_slot_has_no_descriptor() {
        let types = slot_descriptor_types(&[
            BindingSlot::Constants { num_values: 4 },
            BindingSlot::ConstantBuffer,
            BindingSlot::ShaderResource,
            BindingSlot::Sampler(SamplerState::linear()),
        ]);
        assert_eq!(
            types,
            vec![
                None,
                Some(vk::DescriptorType::UNIFORM_BUFFER),
                Some(vk::DescriptorType::SAMPLED_IMAGE),
                Some(vk::DescriptorType::SAMPLER),
            ]
        );
    }
}
