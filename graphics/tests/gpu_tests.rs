//! GPU integration tests for the graphics crate.
//!
//! Tests are parameterized with `rstest` over every backend. The reference
//! backend always runs; Vulkan and Direct3D 12 cases skip when the backend is
//! not compiled in or no adapter can be created.
//!
//! # Test Categories
//!
//! - **Buffer Tests**: mapping, `update_data` and read-back through staging
//! - **Command List Tests**: recording state, batched submission, barriers
//! - **Render Tests**: clears, copies and a triangle with pixel read-back
//! - **Synchronization Tests**: fences and idle waits
//! - **Validation Tests**: creation errors and descriptor heap exhaustion
//!
//! ```bash
//! cargo test --test gpu_tests
//! cargo test --test gpu_tests --features d3d12-backend
//! ```

mod common;

use rstest::rstest;

use common::{
    Backend, TRIANGLE_SHADER, TRIANGLE_STRIDE, TestContext, rgba8_at, triangle_vertices,
};
use keystone_graphics::{
    BindFlags, BindingSlot, BufferDescriptor, ClearColor, CommandListState,
    DescriptorHeapCapacities, GraphicsError, IndexFormat, InputElement, PipelineStateDescriptor,
    ResourceState, ResourceUsage, ScissorRect, ShaderDescriptor, ShaderStage, TextureDescriptor,
    TextureFormat, VertexFormat, Viewport,
};

fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

// ============================================================================
// Buffer Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_dynamic_buffer_map_write_unmap(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = test_pattern(256);
    let mut buffer = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(256, ResourceUsage::Dynamic, BindFlags::VERTEX_BUFFER),
            None,
        )
        .unwrap();
    let mut mapping = buffer.map().unwrap();
    mapping.copy_from_slice(&data);
    mapping.unmap();

    assert_eq!(ctx.read_buffer(&buffer), data);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_update_data_round_trip(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    for usage in [ResourceUsage::Default, ResourceUsage::Dynamic] {
        let initial = vec![0xAB; 128];
        let buffer = ctx
            .device
            .create_buffer(
                &BufferDescriptor::new(128, usage, BindFlags::VERTEX_BUFFER),
                Some(&initial),
            )
            .unwrap();
        let patch = test_pattern(32);
        buffer.update_data(64, &patch).unwrap();

        let mut expected = initial.clone();
        expected[64..96].copy_from_slice(&patch);
        assert_eq!(ctx.read_buffer(&buffer), expected, "{usage:?} buffer");
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_update_data_rejects_out_of_range_writes(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::constants(64), None)
        .unwrap();
    let err = buffer.update_data(60, &[0; 8]).unwrap_err();
    assert!(matches!(err, GraphicsError::State(_)));

    let immutable = ctx
        .device
        .create_buffer(
            &BufferDescriptor::vertex(16, 16, ResourceUsage::Immutable),
            Some(&[1; 16]),
        )
        .unwrap();
    assert!(matches!(immutable.update_data(0, &[0; 4]), Err(GraphicsError::State(_))));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_device_local_buffer_cannot_be_mapped(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let mut buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::index(64, ResourceUsage::Default), None)
        .unwrap();
    assert!(matches!(buffer.map(), Err(GraphicsError::State(_))));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_copy_buffer_with_offsets(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let source = test_pattern(64);
    let src = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(64, ResourceUsage::Default, BindFlags::VERTEX_BUFFER),
            Some(&source),
        )
        .unwrap();
    let dst = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(64, ResourceUsage::Default, BindFlags::VERTEX_BUFFER),
            Some(&[0; 64]),
        )
        .unwrap();
    ctx.run(|list| list.copy_buffer(&src, 16, &dst, 32, 16)).unwrap();

    let result = ctx.read_buffer(&dst);
    assert_eq!(&result[32..48], &source[16..32]);
    assert!(result[..32].iter().all(|&b| b == 0));
    assert!(result[48..].iter().all(|&b| b == 0));
}

// ============================================================================
// Command List Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_recording_into_closed_list_is_rejected(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let target = ctx.render_target(16, 16, TextureFormat::Rgba8Unorm);
    let mut list = ctx.device.create_command_list().unwrap();
    assert_eq!(list.state(), CommandListState::Closed);

    let err = list.clear_render_target(&target, ClearColor::BLACK).unwrap_err();
    assert!(matches!(err, GraphicsError::State(_)));
    assert!(matches!(list.close(), Err(GraphicsError::State(_))));
    assert_eq!(list.state(), CommandListState::Closed);

    list.reset().unwrap();
    assert!(list.is_open());
    list.clear_render_target(&target, ClearColor::new(0.0, 0.0, 1.0, 1.0)).unwrap();

    // An open list is rejected at submission without side effects.
    let submissions = ctx.device.statistics().submissions;
    assert!(matches!(
        ctx.device.execute_command_lists(&[&list]),
        Err(GraphicsError::State(_))
    ));
    assert_eq!(ctx.device.statistics().submissions, submissions);

    list.close().unwrap();
    ctx.device.execute_command_lists(&[&list]).unwrap();
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(rgba8_at(&ctx.read_texture(&target), 16, 8, 8), [0, 0, 255, 255]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_batched_submission_matches_sequential(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let render = |batched: bool| -> Vec<u8> {
        let target = ctx.render_target(32, 32, TextureFormat::Rgba8Unorm);
        let mut staging = ctx
            .device
            .create_texture(&TextureDescriptor::staging_2d(32, 32, TextureFormat::Rgba8Unorm), None)
            .unwrap();

        let mut a = ctx.device.create_command_list().unwrap();
        a.reset().unwrap();
        a.clear_render_target(&target, ClearColor::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        a.close().unwrap();

        let mut b = ctx.device.create_command_list().unwrap();
        b.reset().unwrap();
        b.copy_texture(&target, &staging).unwrap();
        b.close().unwrap();

        if batched {
            ctx.device.execute_command_lists(&[&a, &b]).unwrap();
        } else {
            ctx.device.execute_command_lists(&[&a]).unwrap();
            ctx.device.execute_command_lists(&[&b]).unwrap();
        }
        ctx.device.wait_for_idle().unwrap();
        staging.map().unwrap().to_vec()
    };

    let batched = render(true);
    let sequential = render(false);
    assert_eq!(batched, sequential);
    assert_eq!(rgba8_at(&batched, 32, 0, 0), [255, 0, 0, 255]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_barrier_only_submissions(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let texture = ctx.render_target(64, 64, TextureFormat::Rgba8Unorm);
    let before = ctx.dummy_statistics();
    let submissions = ctx.device.statistics().submissions;

    let mut list = ctx.device.create_command_list().unwrap();
    let fence = ctx.device.create_fence(0).unwrap();
    for i in 1..=100 {
        fence.wait(fence.last_signaled_value()).unwrap();
        list.reset().unwrap();
        list.transition(&texture, ResourceState::CopySource).unwrap();
        list.transition(&texture, ResourceState::RenderTarget).unwrap();
        list.close().unwrap();
        ctx.device.execute_command_lists(&[&list]).unwrap();
        fence.signal(i).unwrap();
    }
    ctx.device.wait_for_idle().unwrap();

    assert_eq!(fence.completed_value(), 100);
    assert!(!list.is_in_flight());
    assert!(ctx.device.statistics().submissions >= submissions + 100);
    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.barriers - before.barriers, 200);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_transition_to_current_state_records_nothing(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let texture = ctx.render_target(8, 8, TextureFormat::Rgba8Unorm);
    ctx.run(|list| {
        list.transition(&texture, ResourceState::ShaderResource)?;
        list.transition(&texture, ResourceState::ShaderResource)
    })
    .unwrap();
    assert_eq!(texture.state(), ResourceState::ShaderResource);

    let before = ctx.dummy_statistics();
    ctx.run(|list| list.transition(&texture, ResourceState::ShaderResource))
        .unwrap();
    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.barriers, before.barriers);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_draw_requires_graphics_pipeline(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    assert!(matches!(list.draw(3, 1, 0, 0), Err(GraphicsError::State(_))));
    assert!(matches!(list.dispatch(1, 1, 1), Err(GraphicsError::State(_))));
    assert!(matches!(list.set_root_constants(0, &[1]), Err(GraphicsError::State(_))));
    // Failed commands leave the list open.
    assert!(list.is_open());
    list.close().unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_discarded_recording_restores_states(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let target = ctx.render_target(16, 16, TextureFormat::Rgba8Unorm);
    let initial = target.state();

    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    list.clear_render_target(&target, ClearColor::BLACK).unwrap();
    list.transition(&target, ResourceState::CopySource).unwrap();
    assert_eq!(target.state(), ResourceState::CopySource);
    list.reset().unwrap();
    assert_eq!(target.state(), initial);

    // A closed list that is never submitted is rolled back when dropped.
    list.transition(&target, ResourceState::ShaderResource).unwrap();
    list.close().unwrap();
    drop(list);
    assert_eq!(target.state(), initial);

    // Submitted recordings are kept.
    ctx.run(|list| list.transition(&target, ResourceState::CopySource)).unwrap();
    assert_eq!(target.state(), ResourceState::CopySource);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_same_list_twice_in_one_batch_is_rejected(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let target = ctx.render_target(16, 16, TextureFormat::Rgba8Unorm);
    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    list.clear_render_target(&target, ClearColor::BLACK).unwrap();
    list.close().unwrap();

    let submissions = ctx.device.statistics().submissions;
    assert!(matches!(
        ctx.device.execute_command_lists(&[&list, &list]),
        Err(GraphicsError::State(_))
    ));
    assert_eq!(ctx.device.statistics().submissions, submissions);
    assert!(!list.is_in_flight());

    ctx.device.execute_command_lists(&[&list]).unwrap();
    ctx.device.wait_for_idle().unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_closed_list_can_be_submitted_again(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let target = ctx.render_target(16, 16, TextureFormat::Rgba8Unorm);
    ctx.run(|list| list.clear_render_target(&target, ClearColor::BLACK)).unwrap();
    assert_eq!(target.state(), ResourceState::RenderTarget);

    // Starts and ends in the same state, so it replays cleanly.
    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    list.clear_render_target(&target, ClearColor::new(0.0, 1.0, 0.0, 1.0)).unwrap();
    list.transition(&target, ResourceState::CopySource).unwrap();
    list.transition(&target, ResourceState::RenderTarget).unwrap();
    list.close().unwrap();

    let submissions = ctx.device.statistics().submissions;
    for _ in 0..3 {
        ctx.device.execute_command_lists(&[&list]).unwrap();
        ctx.device.wait_for_idle().unwrap();
    }
    assert_eq!(ctx.device.statistics().submissions, submissions + 3);
    assert_eq!(target.state(), ResourceState::RenderTarget);
    assert_eq!(rgba8_at(&ctx.read_texture(&target), 16, 4, 4), [0, 255, 0, 255]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_replay_from_a_different_state_is_rejected(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let target = ctx.render_target(16, 16, TextureFormat::Rgba8Unorm);
    ctx.run(|list| list.clear_render_target(&target, ClearColor::BLACK)).unwrap();

    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    list.transition(&target, ResourceState::CopySource).unwrap();
    list.close().unwrap();
    ctx.device.execute_command_lists(&[&list]).unwrap();
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(target.state(), ResourceState::CopySource);

    // The recorded barrier expects RenderTarget.
    let submissions = ctx.device.statistics().submissions;
    assert!(matches!(
        ctx.device.execute_command_lists(&[&list]),
        Err(GraphicsError::State(_))
    ));
    assert_eq!(ctx.device.statistics().submissions, submissions);
    assert_eq!(target.state(), ResourceState::CopySource);

    // Recording it again from the current state works.
    list.reset().unwrap();
    list.transition(&target, ResourceState::RenderTarget).unwrap();
    list.close().unwrap();
    ctx.device.execute_command_lists(&[&list]).unwrap();
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(target.state(), ResourceState::RenderTarget);
}

// ============================================================================
// Render Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_clear_copy_readback_256(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let target = ctx.render_target(256, 256, TextureFormat::Rgba8Unorm);
    let copy = ctx.render_target(256, 256, TextureFormat::Rgba8Unorm);
    ctx.run(|list| {
        list.clear_render_target(&target, ClearColor::new(1.0, 0.0, 0.0, 1.0))?;
        list.copy_texture(&target, &copy)
    })
    .unwrap();

    let pixels = ctx.read_texture(&copy);
    assert_eq!(pixels.len(), 256 * 256 * 4);
    assert!(pixels.chunks_exact(4).all(|texel| texel == [255, 0, 0, 255]));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_texture_initial_data_round_trip(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let data = test_pattern(8 * 4 * 4);
    let texture = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(8, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE),
            Some(&data),
        )
        .unwrap();
    assert_eq!(ctx.read_texture(&texture), data);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_clear_depth(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let depth = ctx
        .device
        .create_texture(
            &TextureDescriptor::depth_stencil(16, 16, TextureFormat::Depth32Float),
            None,
        )
        .unwrap();
    ctx.run(|list| list.clear_depth_stencil(&depth, 0.5, 0)).unwrap();

    let texels = ctx.read_texture(&depth);
    assert_eq!(texels.len(), 16 * 16 * 4);
    assert!(
        texels
            .chunks_exact(4)
            .all(|texel| f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]) == 0.5)
    );
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_triangle(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let pipeline = ctx
        .device
        .create_pipeline_state(
            &PipelineStateDescriptor::graphics(
                ShaderDescriptor::vertex(TRIANGLE_SHADER, "vs_main"),
                ShaderDescriptor::pixel(TRIANGLE_SHADER, "ps_main"),
            )
            .with_label("triangle")
            .with_input_layout(vec![
                InputElement::new("POSITION", VertexFormat::Float32x3, 0, 0),
                InputElement::new("COLOR", VertexFormat::Float32x4, 0, 12),
            ])
            .with_render_target(TextureFormat::Rgba8Unorm),
        )
        .unwrap();
    let vertices = ctx.vertex_buffer(&triangle_vertices(), TRIANGLE_STRIDE);
    let target = ctx.render_target(64, 64, TextureFormat::Rgba8Unorm);
    let before = ctx.dummy_statistics();

    ctx.run(|list| {
        list.set_render_targets(&[&target], None)?;
        list.set_viewports(&[Viewport::from_dimensions(64, 64)])?;
        list.set_scissor_rects(&[ScissorRect::from_dimensions(64, 64)])?;
        list.clear_render_target(&target, ClearColor::BLACK)?;
        list.set_pipeline_state(&pipeline)?;
        list.set_vertex_buffers(0, &[&vertices])?;
        list.draw(3, 1, 0, 0)
    })
    .unwrap();

    let pixels = ctx.read_texture(&target);
    assert_eq!(rgba8_at(&pixels, 64, 0, 0), [0, 0, 0, 255]);
    if backend.rasterizes() {
        assert_eq!(rgba8_at(&pixels, 64, 32, 32), [0, 255, 0, 255]);
        assert_eq!(rgba8_at(&pixels, 64, 63, 0), [0, 0, 0, 255]);
    }
    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.draws - before.draws, 1);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_indexed_triangle(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let pipeline = ctx
        .device
        .create_pipeline_state(
            &PipelineStateDescriptor::graphics(
                ShaderDescriptor::vertex(TRIANGLE_SHADER, "vs_main"),
                ShaderDescriptor::pixel(TRIANGLE_SHADER, "ps_main"),
            )
            .with_label("indexed triangle")
            .with_input_layout(vec![
                InputElement::new("POSITION", VertexFormat::Float32x3, 0, 0),
                InputElement::new("COLOR", VertexFormat::Float32x4, 0, 12),
            ])
            .with_render_target(TextureFormat::Rgba8Unorm),
        )
        .unwrap();
    let vertices = ctx.vertex_buffer(&triangle_vertices(), TRIANGLE_STRIDE);
    let indices: &[u8] = bytemuck::cast_slice(&[2u32, 1, 0]);
    let index_buffer = ctx
        .device
        .create_buffer(
            &BufferDescriptor::index(indices.len() as u64, ResourceUsage::Immutable)
                .with_label("triangle indices"),
            Some(indices),
        )
        .unwrap();
    let target = ctx.render_target(64, 64, TextureFormat::Rgba8Unorm);
    let before = ctx.dummy_statistics();

    ctx.run(|list| {
        list.set_render_targets(&[&target], None)?;
        list.set_viewports(&[Viewport::from_dimensions(64, 64)])?;
        list.set_scissor_rects(&[ScissorRect::from_dimensions(64, 64)])?;
        list.clear_render_target(&target, ClearColor::BLACK)?;
        list.set_pipeline_state(&pipeline)?;
        list.set_vertex_buffers(0, &[&vertices])?;
        list.set_index_buffer(&index_buffer, IndexFormat::Uint32)?;
        list.draw_indexed(3, 1, 0, 0, 0)
    })
    .unwrap();
    assert_eq!(index_buffer.state(), ResourceState::IndexBuffer);

    let pixels = ctx.read_texture(&target);
    assert_eq!(rgba8_at(&pixels, 64, 0, 0), [0, 0, 0, 255]);
    if backend.rasterizes() {
        assert_eq!(rgba8_at(&pixels, 64, 32, 32), [0, 255, 0, 255]);
    }
    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.draws - before.draws, 1);
    }
}

const TINTED_TEXTURE_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;
@group(0) @binding(1) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn ps_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(source, vec2<i32>(0, 0), 0) * tint;
}
"#;

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_constant_buffer_and_shader_resource(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let pipeline = ctx
        .device
        .create_pipeline_state(
            &PipelineStateDescriptor::graphics(
                ShaderDescriptor::vertex(TINTED_TEXTURE_SHADER, "vs_main"),
                ShaderDescriptor::pixel(TINTED_TEXTURE_SHADER, "ps_main"),
            )
            .with_label("tinted texture")
            .with_bindings(vec![BindingSlot::ConstantBuffer, BindingSlot::ShaderResource])
            .with_render_target(TextureFormat::Rgba8Unorm),
        )
        .unwrap();
    let tint = ctx.device.create_buffer(&BufferDescriptor::constants(256), None).unwrap();
    tint.update_data(0, bytemuck::cast_slice(&[0.0f32, 1.0, 1.0, 1.0])).unwrap();
    let source = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(1, 1, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE),
            Some(&[255, 255, 0, 255]),
        )
        .unwrap();
    let target = ctx.render_target(32, 32, TextureFormat::Rgba8Unorm);
    let before = ctx.dummy_statistics();

    ctx.run(|list| {
        list.set_render_targets(&[&target], None)?;
        list.set_viewports(&[Viewport::from_dimensions(32, 32)])?;
        list.set_scissor_rects(&[ScissorRect::from_dimensions(32, 32)])?;
        list.clear_render_target(&target, ClearColor::BLACK)?;
        list.set_pipeline_state(&pipeline)?;
        list.set_constant_buffer(0, &tint)?;
        list.set_shader_resource(1, &source)?;
        list.draw(3, 1, 0, 0)
    })
    .unwrap();
    assert_eq!(source.state(), ResourceState::ShaderResource);

    if backend.rasterizes() {
        let pixels = ctx.read_texture(&target);
        assert_eq!(rgba8_at(&pixels, 32, 16, 16), [0, 255, 0, 255]);
    }
    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.draws - before.draws, 1);
    }
}

const SCALE_SHADER: &str = r#"
struct Params {
    scale: f32,
    offset: f32,
}
var<push_constant> params: Params;

@compute @workgroup_size(8, 1, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    var value = f32(id.x) * params.scale + params.offset;
    value = value + 1.0;
}
"#;

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_compute_dispatch(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let pipeline = ctx
        .device
        .create_pipeline_state(
            &PipelineStateDescriptor::compute(ShaderDescriptor::compute(SCALE_SHADER, "cs_main"))
                .with_label("scale")
                .with_bindings(vec![BindingSlot::Constants { num_values: 2 }]),
        )
        .unwrap();
    assert!(pipeline.is_compute());
    let before = ctx.dummy_statistics();

    ctx.run(|list| {
        list.set_pipeline_state(&pipeline)?;
        list.set_root_constants(0, &[2.0f32.to_bits(), 0.5f32.to_bits()])?;
        list.dispatch(1, 1, 1)?;
        // Graphics work needs a graphics pipeline.
        assert!(matches!(list.draw(3, 1, 0, 0), Err(GraphicsError::State(_))));
        Ok(())
    })
    .unwrap();

    if let (Some(before), Some(after)) = (before, ctx.dummy_statistics()) {
        assert_eq!(after.dispatches - before.dispatches, 1);
        assert_eq!(after.draws, before.draws);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_bindings_are_checked_against_pipeline_layout(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let pipeline = ctx
        .device
        .create_pipeline_state(
            &PipelineStateDescriptor::graphics(
                ShaderDescriptor::vertex(TRIANGLE_SHADER, "vs_main"),
                ShaderDescriptor::pixel(TRIANGLE_SHADER, "ps_main"),
            )
            .with_input_layout(vec![
                InputElement::new("POSITION", VertexFormat::Float32x3, 0, 0),
                InputElement::new("COLOR", VertexFormat::Float32x4, 0, 12),
            ])
            .with_bindings(vec![BindingSlot::Constants { num_values: 4 }])
            .with_render_target(TextureFormat::Rgba8Unorm),
        )
        .unwrap();
    let constants = ctx.device.create_buffer(&BufferDescriptor::constants(256), None).unwrap();

    let mut list = ctx.device.create_command_list().unwrap();
    list.reset().unwrap();
    list.set_pipeline_state(&pipeline).unwrap();
    list.set_root_constants(0, &[0, 0, 0, 0]).unwrap();
    assert!(matches!(list.set_root_constants(0, &[0; 5]), Err(GraphicsError::State(_))));
    assert!(matches!(list.set_constant_buffer(0, &constants), Err(GraphicsError::State(_))));
    assert!(matches!(list.set_constant_buffer(1, &constants), Err(GraphicsError::State(_))));
    list.close().unwrap();
}

// ============================================================================
// Synchronization Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_fence_wait_implies_completion(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let fence = ctx.device.create_fence(3).unwrap();
    assert_eq!(fence.completed_value(), 3);
    assert_eq!(fence.last_signaled_value(), 3);
    // Already reached.
    fence.wait(2).unwrap();

    let target = ctx.render_target(32, 32, TextureFormat::Rgba8Unorm);
    let mut list = ctx.device.create_command_list().unwrap();
    for value in [4, 5, 9] {
        list.reset().unwrap();
        list.clear_render_target(&target, ClearColor::BLACK).unwrap();
        list.close().unwrap();
        ctx.device.execute_command_lists(&[&list]).unwrap();
        fence.signal(value).unwrap();
        fence.wait(value).unwrap();
        assert!(fence.completed_value() >= value);
        assert!(!list.is_in_flight());
    }

    assert!(matches!(fence.signal(8), Err(GraphicsError::State(_))));
    // Signaling the last value again is a no-op.
    fence.signal(9).unwrap();
    assert_eq!(fence.last_signaled_value(), 9);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_wait_for_idle_without_work(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };
    ctx.device.wait_for_idle().unwrap();
    ctx.device.execute_command_lists(&[]).unwrap();
    ctx.device.wait_for_idle().unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_never_recorded_list_is_skipped(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };
    let list = ctx.device.create_command_list().unwrap();
    ctx.device.execute_command_lists(&[&list]).unwrap();
    ctx.device.wait_for_idle().unwrap();
}

// ============================================================================
// Validation Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_invalid_descriptors_fail_creation(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };
    let device = &ctx.device;

    let zero = BufferDescriptor::new(0, ResourceUsage::Default, BindFlags::VERTEX_BUFFER);
    assert!(matches!(device.create_buffer(&zero, None), Err(GraphicsError::ResourceCreation(_))));

    let immutable = BufferDescriptor::vertex(64, 16, ResourceUsage::Immutable);
    assert!(matches!(
        device.create_buffer(&immutable, None),
        Err(GraphicsError::ResourceCreation(_))
    ));

    let texture =
        TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE);
    assert!(matches!(
        device.create_texture(&texture, Some(&[0; 15])),
        Err(GraphicsError::ResourceCreation(_))
    ));

    let too_many_mips = texture.clone().with_mip_levels(4);
    assert!(matches!(
        device.create_texture(&too_many_mips, None),
        Err(GraphicsError::ResourceCreation(_))
    ));

    let no_targets = PipelineStateDescriptor::graphics(
        ShaderDescriptor::vertex(TRIANGLE_SHADER, "vs_main"),
        ShaderDescriptor::pixel(TRIANGLE_SHADER, "ps_main"),
    );
    assert!(matches!(
        device.create_pipeline_state(&no_targets),
        Err(GraphicsError::ResourceCreation(_))
    ));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_shader_errors_carry_diagnostics(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    match ctx.device.create_shader(&ShaderDescriptor::pixel("fn main( {", "main")) {
        Err(GraphicsError::Compilation { stage, diagnostic }) => {
            assert_eq!(stage, ShaderStage::Pixel);
            assert!(!diagnostic.is_empty());
        }
        other => panic!("expected a compilation error, got {other:?}"),
    }

    let geometry = ShaderDescriptor::new(ShaderStage::Geometry, TRIANGLE_SHADER, "vs_main");
    assert!(matches!(
        ctx.device.create_shader(&geometry),
        Err(GraphicsError::Compilation { .. })
    ));

    let shader = ctx
        .device
        .create_shader(&ShaderDescriptor::vertex(TRIANGLE_SHADER, "vs_main"))
        .unwrap();
    assert_eq!(shader.stage(), ShaderStage::Vertex);
    assert_eq!(shader.entry_point(), "vs_main");
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::d3d12(Backend::D3D12)]
fn test_descriptor_heap_exhaustion(#[case] backend: Backend) {
    let capacities = DescriptorHeapCapacities {
        render_target: 2,
        ..DescriptorHeapCapacities::default()
    };
    let Some(ctx) = TestContext::with_descriptor_heaps(backend, capacities) else {
        return;
    };

    let descriptor =
        TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, BindFlags::RENDER_TARGET);
    let first = ctx.device.create_texture(&descriptor, None).unwrap();
    let _second = ctx.device.create_texture(&descriptor, None).unwrap();
    assert!(matches!(
        ctx.device.create_texture(&descriptor, None),
        Err(GraphicsError::ResourceCreation(_))
    ));

    // Slots come back once the GPU is done with the texture.
    ctx.device.destroy_texture(first).unwrap();
    ctx.device.wait_for_idle().unwrap();
    ctx.device.create_texture(&descriptor, None).unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_resources_of_another_device_are_rejected(#[case] backend: Backend) {
    let (Some(a), Some(b)) = (TestContext::new(backend), TestContext::new(backend)) else {
        return;
    };

    let texture = a.render_target(8, 8, TextureFormat::Rgba8Unorm);
    let mut list = b.device.create_command_list().unwrap();
    list.reset().unwrap();
    assert!(matches!(
        list.clear_render_target(&texture, ClearColor::BLACK),
        Err(GraphicsError::State(_))
    ));
    list.close().unwrap();
    assert!(matches!(a.device.execute_command_lists(&[&list]), Err(GraphicsError::State(_))));
    assert!(matches!(b.device.destroy_texture(texture), Err(GraphicsError::State(_))));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_statistics_track_live_resources(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        return;
    };

    let start = ctx.device.statistics();
    let buffer = ctx.device.create_buffer(&BufferDescriptor::constants(256), None).unwrap();
    let texture = ctx.render_target(4, 4, TextureFormat::Rgba8Unorm);
    let fence = ctx.device.create_fence(0).unwrap();

    let live = ctx.device.statistics();
    assert_eq!(live.buffers, start.buffers + 1);
    assert_eq!(live.textures, start.textures + 1);
    assert_eq!(live.fences, start.fences + 1);

    ctx.device.destroy_buffer(buffer).unwrap();
    ctx.device.destroy_texture(texture).unwrap();
    ctx.device.destroy_fence(fence).unwrap();
    let end = ctx.device.statistics();
    assert_eq!(
        (end.buffers, end.textures, end.fences),
        (start.buffers, start.textures, start.fences)
    );
}
