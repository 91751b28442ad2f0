//! Mapping of abstract resource states to Vulkan layouts, stages and access.

use ash::vk;

use crate::types::ResourceState;

/// Synchronization scope of one [`ResourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct StateAccess {
    /// Image layout. Ignored for buffers.
    pub layout: vk::ImageLayout,
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl StateAccess {
    /// Scope used for the first barrier of an image whose contents are
    /// undefined (fresh images and newly acquired swap chain images).
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stages: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
    };
}

const ALL_SHADERS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
);

const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

/// Synchronization scope of `state`.
pub(super) fn state_access(state: ResourceState) -> StateAccess {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    let (layout, stages, access) = match state {
        ResourceState::Common => (L::GENERAL, S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        ResourceState::VertexBuffer => {
            (L::GENERAL, S::VERTEX_ATTRIBUTE_INPUT, A::VERTEX_ATTRIBUTE_READ)
        }
        ResourceState::IndexBuffer => (L::GENERAL, S::INDEX_INPUT, A::INDEX_READ),
        ResourceState::ConstantBuffer => (L::GENERAL, ALL_SHADERS, A::UNIFORM_READ),
        ResourceState::ShaderResource => {
            (L::SHADER_READ_ONLY_OPTIMAL, ALL_SHADERS, A::SHADER_SAMPLED_READ)
        }
        ResourceState::UnorderedAccess => {
            (L::GENERAL, ALL_SHADERS, A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE)
        }
        ResourceState::RenderTarget => (
            L::COLOR_ATTACHMENT_OPTIMAL,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthWrite => (
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead => (
            L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            FRAGMENT_TESTS | S::FRAGMENT_SHADER,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::SHADER_SAMPLED_READ,
        ),
        ResourceState::CopyDest => (L::TRANSFER_DST_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_WRITE),
        ResourceState::CopySource => (L::TRANSFER_SRC_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_READ),
        // Presentation engine reads are ordered by the present semaphore.
        ResourceState::Present => (L::PRESENT_SRC_KHR, S::NONE, A::NONE),
    };
    StateAccess {
        layout,
        stages,
        access,
    }
}

/// Aspect mask of a whole image of `format`.
pub(super) fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_target_layout() {
        let access = state_access(ResourceState::RenderTarget);
        assert_eq!(access.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(access.access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_copy_states_use_transfer_layouts() {
        assert_eq!(
            state_access(ResourceState::CopyDest).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            state_access(ResourceState::CopySource).layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }

    #[test]
    fn test_present_has_no_access() {
        let access = state_access(ResourceState::Present);
        assert_eq!(access.layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(access.access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_depth_aspects() {
        assert_eq!(aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_mask(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
