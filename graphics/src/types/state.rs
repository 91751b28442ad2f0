//! Abstract resource usage states.

use super::{BindFlags, ResourceUsage};

/// The usage state a buffer or texture is currently in.
///
/// Transitions are explicit: a command list records a barrier whenever a
/// resource moves between states, and the barrier is applied before the next
/// command that depends on the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Common,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopyDest,
    CopySource,
    Present,
}

impl ResourceState {
    /// Whether the GPU may write to a resource in this state.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::UnorderedAccess | Self::RenderTarget | Self::DepthWrite | Self::CopyDest
        )
    }

    /// State a resource settles in after creation or upload, given its bind flags.
    ///
    /// Render targets and depth buffers start attached; everything else starts in
    /// the most specific read state its flags allow.
    pub fn for_bind_flags(flags: BindFlags) -> Self {
        if flags.contains(BindFlags::RENDER_TARGET) {
            Self::RenderTarget
        } else if flags.contains(BindFlags::DEPTH_STENCIL) {
            Self::DepthWrite
        } else if flags.contains(BindFlags::UNORDERED_ACCESS) {
            Self::UnorderedAccess
        } else if flags.contains(BindFlags::VERTEX_BUFFER) {
            Self::VertexBuffer
        } else if flags.contains(BindFlags::INDEX_BUFFER) {
            Self::IndexBuffer
        } else if flags.contains(BindFlags::CONSTANT_BUFFER) {
            Self::ConstantBuffer
        } else if flags.contains(BindFlags::SHADER_RESOURCE) {
            Self::ShaderResource
        } else {
            Self::Common
        }
    }
}

impl ResourceState {
    /// State of a freshly created resource.
    ///
    /// Device-local resources with initial data end their upload in the state
    /// their bind flags suggest. Everything else starts in `Common`.
    pub fn initial(usage: ResourceUsage, bind_flags: BindFlags, has_data: bool) -> Self {
        if has_data && !usage.is_host_visible() {
            Self::for_bind_flags(bind_flags)
        } else {
            Self::Common
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_states() {
        assert!(ResourceState::CopyDest.is_write());
        assert!(ResourceState::RenderTarget.is_write());
        assert!(!ResourceState::ShaderResource.is_write());
        assert!(!ResourceState::Present.is_write());
    }

    #[test]
    fn test_state_for_bind_flags() {
        assert_eq!(
            ResourceState::for_bind_flags(BindFlags::VERTEX_BUFFER),
            ResourceState::VertexBuffer
        );
        assert_eq!(
            ResourceState::for_bind_flags(BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE),
            ResourceState::RenderTarget
        );
        assert_eq!(
            ResourceState::for_bind_flags(BindFlags::empty()),
            ResourceState::Common
        );
    }

    #[test]
    fn test_initial_state() {
        let flags = BindFlags::VERTEX_BUFFER;
        assert_eq!(
            ResourceState::initial(ResourceUsage::Immutable, flags, true),
            ResourceState::VertexBuffer
        );
        assert_eq!(
            ResourceState::initial(ResourceUsage::Default, flags, false),
            ResourceState::Common
        );
        assert_eq!(
            ResourceState::initial(ResourceUsage::Dynamic, flags, true),
            ResourceState::Common
        );
    }
}
