//! Frame loop helper on top of the device's primary swap chain.
//!
//! [`FrameRenderer`] keeps one command list per frame slot and a fence that
//! orders the CPU against the GPU across frames, so that frame N+1 can be
//! recorded while the GPU still executes frame N.
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut renderer = FrameRenderer::new(&device, 2)?;
//! loop {
//!     let list = renderer.begin_frame(&device)?;
//!     list.set_pipeline_state(&pipeline)?;
//!     list.draw(3, 1, 0, 0)?;
//!     renderer.end_frame(&mut device)?;
//! }
//! renderer.wait_idle()?;
//! ```

use crate::command_list::CommandList;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Fence;
use crate::types::{ClearColor, ResourceState, ScissorRect, Viewport};

const COMPONENT: &str = "renderer";

struct FrameSlot {
    command_list: CommandList,
    /// Fence value signaled after this slot's last submission, 0 if unused.
    fence_value: u64,
}

/// Records and presents frames with a fixed number of frames in flight.
///
/// Not thread-safe in the sense of concurrent use; it is owned by the render
/// thread together with the device.
pub struct FrameRenderer {
    slots: Vec<FrameSlot>,
    fence: Fence,
    current_slot: usize,
    frame_count: u64,
    clear_color: ClearColor,
    recording: bool,
}

impl FrameRenderer {
    /// Create a renderer with `frames_in_flight` slots (typically 2 or 3).
    pub fn new(device: &GraphicsDevice, frames_in_flight: usize) -> GraphicsResult<Self> {
        if frames_in_flight == 0 {
            return Err(GraphicsError::State("frames_in_flight must be at least 1".to_string())
                .logged(COMPONENT, "new"));
        }
        let slots = (0..frames_in_flight)
            .map(|slot| {
                Ok(FrameSlot {
                    command_list: device
                        .create_command_list()?
                        .with_label(format!("frame slot {slot}")),
                    fence_value: 0,
                })
            })
            .collect::<GraphicsResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            fence: device.create_fence(0)?,
            current_slot: 0,
            frame_count: 0,
            clear_color: ClearColor::BLACK,
            recording: false,
        })
    }

    /// Color the back buffer is cleared to at the start of each frame.
    pub fn with_clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = color;
        self
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames started so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Start a frame and return its open command list.
    ///
    /// Waits until the GPU has finished the previous frame recorded in this
    /// slot, then resets the slot's command list, transitions the current back
    /// buffer to `RenderTarget`, binds it with a full-size viewport and
    /// scissor and clears it. If any of that fails the partial recording is
    /// discarded and the list is left closed.
    pub fn begin_frame(&mut self, device: &GraphicsDevice) -> GraphicsResult<&mut CommandList> {
        crate::profile_scope!("begin_frame");
        if self.recording {
            return Err(
                GraphicsError::State("begin_frame called twice without end_frame".to_string())
                    .logged(COMPONENT, "begin_frame"),
            );
        }
        let swap_chain = device.swap_chain().ok_or_else(|| {
            GraphicsError::State("device has no primary swap chain".to_string())
                .logged(COMPONENT, "begin_frame")
        })?;

        let slot = &mut self.slots[self.current_slot];
        self.fence.wait(slot.fence_value)?;

        let back_buffer = swap_chain.current_back_buffer()?;
        let (width, height) = (swap_chain.width(), swap_chain.height());
        let list = &mut slot.command_list;
        list.reset()?;
        let started = (|| {
            list.transition(back_buffer, ResourceState::RenderTarget)?;
            list.set_render_targets(&[back_buffer], None)?;
            list.set_viewports(&[Viewport::from_dimensions(width, height)])?;
            list.set_scissor_rects(&[ScissorRect::from_dimensions(width, height)])?;
            list.clear_render_target(back_buffer, self.clear_color)
        })();
        if let Err(e) = started {
            discard(list);
            return Err(e);
        }

        self.frame_count += 1;
        self.recording = true;
        log::trace!("Begin frame {} (slot {})", self.frame_count, self.current_slot);
        Ok(list)
    }

    /// Finish the frame: transition the back buffer to `Present`, close and
    /// submit the slot's command list, signal the frame fence and present.
    pub fn end_frame(&mut self, device: &mut GraphicsDevice) -> GraphicsResult<()> {
        crate::profile_scope!("end_frame");
        if !self.recording {
            return Err(
                GraphicsError::State("end_frame called without begin_frame".to_string())
                    .logged(COMPONENT, "end_frame"),
            );
        }
        self.recording = false;

        let slot = &mut self.slots[self.current_slot];
        let closed = (|| {
            let back_buffer = device.back_buffer(device.back_buffer_index()?)?;
            slot.command_list.transition(back_buffer, ResourceState::Present)?;
            slot.command_list.close()
        })();
        if let Err(e) = closed {
            discard(&mut slot.command_list);
            return Err(e);
        }
        device.execute_command_lists(&[&slot.command_list])?;

        let value = self.fence.last_signaled_value() + 1;
        self.fence.signal(value)?;
        slot.fence_value = value;
        device.present()?;
        crate::frame_mark!();

        log::trace!("End frame {} (slot {})", self.frame_count, self.current_slot);
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        Ok(())
    }

    /// Block until every submitted frame has completed.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.fence.wait(self.fence.last_signaled_value())
    }
}

/// Drop a frame's partial recording, restoring the states it changed, and
/// leave the list closed.
fn discard(list: &mut CommandList) {
    if let Err(e) = list.reset().and_then(|()| list.close()) {
        log::warn!("{COMPONENT}: discarding a partial frame failed: {e}");
    }
}

impl std::fmt::Debug for FrameRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("frames_in_flight", &self.slots.len())
            .field("current_slot", &self.current_slot)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_device;
    use crate::types::{DeviceCreationParams, GraphicsApi};

    fn windowed_dummy() -> GraphicsDevice {
        create_device(&DeviceCreationParams::new(GraphicsApi::Dummy).with_size(32, 32)).unwrap()
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let device = windowed_dummy();
        assert!(FrameRenderer::new(&device, 0).is_err());
    }

    #[test]
    fn test_frames_rotate_slots_and_back_buffers() {
        let mut device = windowed_dummy();
        let mut renderer = FrameRenderer::new(&device, 2).unwrap();
        for frame in 0..5u32 {
            assert_eq!(device.back_buffer_index().unwrap(), frame % 2);
            renderer.begin_frame(&device).unwrap();
            renderer.end_frame(&mut device).unwrap();
        }
        renderer.wait_idle().unwrap();
        assert_eq!(renderer.frame_count(), 5);
        assert_eq!(renderer.current_slot(), 1);
        assert_eq!(device.back_buffer(0).unwrap().state(), ResourceState::Present);
    }

    #[test]
    fn test_end_without_begin() {
        let mut device = windowed_dummy();
        let mut renderer = FrameRenderer::new(&device, 1).unwrap();
        assert!(matches!(renderer.end_frame(&mut device), Err(GraphicsError::State(_))));
    }

    #[test]
    fn test_failed_begin_discards_partial_frame() {
        let device = windowed_dummy();
        let other = windowed_dummy();
        let mut renderer = FrameRenderer::new(&device, 1).unwrap();

        // The other device's back buffer cannot be recorded into this list.
        assert!(matches!(renderer.begin_frame(&other), Err(GraphicsError::State(_))));
        assert_eq!(renderer.slots[0].command_list.state(), crate::CommandListState::Closed);
        assert_eq!(other.back_buffer(0).unwrap().state(), ResourceState::Present);
        assert_eq!(renderer.frame_count(), 0);

        renderer.begin_frame(&device).unwrap();
        assert_eq!(device.back_buffer(0).unwrap().state(), ResourceState::RenderTarget);
    }

    #[test]
    fn test_headless_device_cannot_begin() {
        let device = create_device(&DeviceCreationParams::new(GraphicsApi::Dummy)).unwrap();
        let mut renderer = FrameRenderer::new(&device, 2).unwrap();
        assert!(renderer.begin_frame(&device).is_err());
    }
}
