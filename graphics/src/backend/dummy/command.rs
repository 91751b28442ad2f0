//! Command recording for the reference backend.
//!
//! Commands capture the host memory they touch and are replayed on the CPU
//! when the list is submitted.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::texel::{encode_color, encode_depth_stencil};
use super::{Counters, HostMemory};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, PipelineState, Texture};
use crate::types::{
    ClearColor, IndexFormat, ResourceState, ScissorRect, TextureDescriptor, Viewport,
};

enum DummyCommand {
    Barrier,
    Copy {
        src: Arc<HostMemory>,
        src_offset: usize,
        dst: Arc<HostMemory>,
        dst_offset: usize,
        size: usize,
    },
    Fill {
        dst: Arc<HostMemory>,
        ranges: Vec<Range<usize>>,
        pattern: Vec<u8>,
    },
    Draw,
    Dispatch,
}

/// Recorded commands of one list.
#[derive(Default)]
pub struct DummyCommandList {
    commands: Vec<DummyCommand>,
    compute_bound: Option<bool>,
}

/// Byte ranges covering mip 0 of every layer.
fn top_mip_ranges(descriptor: &TextureDescriptor) -> Vec<Range<usize>> {
    let per_layer: u64 = (0..descriptor.mip_levels)
        .map(|m| descriptor.mip_size_in_bytes(m))
        .sum();
    let mip0 = descriptor.mip_size_in_bytes(0) as usize;
    (0..descriptor.layer_count() as u64)
        .map(|layer| {
            let start = (layer * per_layer) as usize;
            start..start + mip0
        })
        .collect()
}

impl DummyCommandList {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn replay(&self, counters: &Counters) {
        for command in &self.commands {
            match command {
                DummyCommand::Barrier => {
                    counters.barriers.fetch_add(1, Ordering::Relaxed);
                }
                DummyCommand::Copy {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    dst.copy_from(*dst_offset, src, *src_offset, *size);
                    counters.copies.fetch_add(1, Ordering::Relaxed);
                }
                DummyCommand::Fill {
                    dst,
                    ranges,
                    pattern,
                } => {
                    for range in ranges {
                        dst.fill(range.clone(), pattern);
                    }
                    counters.clears.fetch_add(1, Ordering::Relaxed);
                }
                DummyCommand::Draw => {
                    counters.draws.fetch_add(1, Ordering::Relaxed);
                }
                DummyCommand::Dispatch => {
                    counters.dispatches.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn reset(&mut self) -> GraphicsResult<()> {
        self.commands.clear();
        self.compute_bound = None;
        Ok(())
    }

    pub fn close(&mut self) -> GraphicsResult<()> {
        Ok(())
    }

    /// Replay is synchronous, so a list is never in flight.
    pub fn is_in_flight(&self) -> bool {
        false
    }

    pub fn transition_buffer(
        &mut self,
        _buffer: &Buffer,
        _before: ResourceState,
        _after: ResourceState,
    ) -> GraphicsResult<()> {
        self.commands.push(DummyCommand::Barrier);
        Ok(())
    }

    pub fn transition_texture(
        &mut self,
        _texture: &Texture,
        _before: ResourceState,
        _after: ResourceState,
    ) -> GraphicsResult<()> {
        self.commands.push(DummyCommand::Barrier);
        Ok(())
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) -> GraphicsResult<()> {
        self.compute_bound = Some(pipeline.raw().as_dummy()?.is_compute);
        Ok(())
    }

    pub fn set_vertex_buffers(
        &mut self,
        _start_slot: u32,
        buffers: &[&Buffer],
    ) -> GraphicsResult<()> {
        for buffer in buffers {
            buffer.raw().as_dummy()?;
        }
        Ok(())
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: &Buffer,
        _format: IndexFormat,
    ) -> GraphicsResult<()> {
        buffer.raw().as_dummy()?;
        Ok(())
    }

    pub fn set_root_constants(&mut self, _index: u32, _values: &[u32]) -> GraphicsResult<()> {
        Ok(())
    }

    pub fn set_constant_buffer(&mut self, _index: u32, buffer: &Buffer) -> GraphicsResult<()> {
        buffer.raw().as_dummy()?;
        Ok(())
    }

    pub fn set_shader_resource(&mut self, _index: u32, texture: &Texture) -> GraphicsResult<()> {
        texture.raw().as_dummy()?;
        Ok(())
    }

    fn require_pipeline(&self, compute: bool) -> GraphicsResult<()> {
        match self.compute_bound {
            Some(bound) if bound == compute => Ok(()),
            Some(_) => Err(GraphicsError::State(format!(
                "bound pipeline is not a {} pipeline",
                if compute { "compute" } else { "graphics" }
            ))),
            None => Err(GraphicsError::State("no pipeline state bound".to_string())),
        }
    }

    pub fn draw(
        &mut self,
        _vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) -> GraphicsResult<()> {
        self.require_pipeline(false)?;
        self.commands.push(DummyCommand::Draw);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) -> GraphicsResult<()> {
        self.require_pipeline(false)?;
        self.commands.push(DummyCommand::Draw);
        Ok(())
    }

    pub fn dispatch(&mut self, _x: u32, _y: u32, _z: u32) -> GraphicsResult<()> {
        self.require_pipeline(true)?;
        self.commands.push(DummyCommand::Dispatch);
        Ok(())
    }

    pub fn copy_texture(&mut self, src: &Texture, dst: &Texture) -> GraphicsResult<()> {
        let src = src.raw().as_dummy()?;
        let dst = dst.raw().as_dummy()?;
        self.commands.push(DummyCommand::Copy {
            src: Arc::clone(&src.memory),
            src_offset: 0,
            dst: Arc::clone(&dst.memory),
            dst_offset: 0,
            size: src.memory.len().min(dst.memory.len()),
        });
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> GraphicsResult<()> {
        let src = src.raw().as_dummy()?;
        let dst = dst.raw().as_dummy()?;
        self.commands.push(DummyCommand::Copy {
            src: Arc::clone(&src.memory),
            src_offset: src_offset as usize,
            dst: Arc::clone(&dst.memory),
            dst_offset: dst_offset as usize,
            size: size as usize,
        });
        Ok(())
    }

    pub fn clear_render_target(
        &mut self,
        texture: &Texture,
        color: ClearColor,
    ) -> GraphicsResult<()> {
        let texture = texture.raw().as_dummy()?;
        let pattern = encode_color(texture.descriptor.format, color.to_array())?;
        self.commands.push(DummyCommand::Fill {
            dst: Arc::clone(&texture.memory),
            ranges: top_mip_ranges(&texture.descriptor),
            pattern,
        });
        Ok(())
    }

    pub fn clear_depth_stencil(
        &mut self,
        texture: &Texture,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        let texture = texture.raw().as_dummy()?;
        let pattern = encode_depth_stencil(texture.descriptor.format, depth, stencil)?;
        self.commands.push(DummyCommand::Fill {
            dst: Arc::clone(&texture.memory),
            ranges: top_mip_ranges(&texture.descriptor),
            pattern,
        });
        Ok(())
    }

    pub fn set_render_targets(
        &mut self,
        render_targets: &[&Texture],
        depth_stencil: Option<&Texture>,
    ) -> GraphicsResult<()> {
        for texture in render_targets.iter().copied().chain(depth_stencil) {
            texture.raw().as_dummy()?;
        }
        Ok(())
    }

    pub fn set_viewports(&mut self, _viewports: &[Viewport]) -> GraphicsResult<()> {
        Ok(())
    }

    pub fn set_scissor_rects(&mut self, _rects: &[ScissorRect]) -> GraphicsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureDimension, TextureFormat};

    #[test]
    fn test_top_mip_ranges_skip_lower_mips() {
        let desc = TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, Default::default())
            .with_mip_levels(2)
            .with_array_size(2);
        // 16 bytes for mip 0, 4 bytes for mip 1, per layer.
        assert_eq!(top_mip_ranges(&desc), vec![0..16, 20..36]);
    }

    #[test]
    fn test_cube_has_six_ranges() {
        let desc = TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba8Unorm, Default::default())
            .with_dimension(TextureDimension::Cube);
        assert_eq!(top_mip_ranges(&desc).len(), 6);
    }
}
