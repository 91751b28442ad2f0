//! Headless swap chain and frame loop tests.
//!
//! The reference backend creates an offscreen primary swap chain from
//! `with_size` alone, so these run everywhere.

mod common;

use keystone_graphics::{
    ClearColor, DeviceCreationParams, FrameRenderer, GraphicsApi, GraphicsDevice, GraphicsError,
    ResourceState, ScissorRect, SwapChainDescriptor, TextureDescriptor, TextureFormat, Viewport,
    create_device,
};

use common::rgba8_at;

fn offscreen_device(width: u32, height: u32) -> GraphicsDevice {
    let _ = env_logger::builder().is_test(true).try_init();
    create_device(
        &DeviceCreationParams::new(GraphicsApi::Dummy)
            .with_size(width, height)
            .with_buffer_count(3),
    )
    .expect("Failed to create offscreen device")
}

#[test]
fn test_primary_swap_chain_back_buffers() {
    let device = offscreen_device(64, 64);
    let swap_chain = device.swap_chain().expect("primary swap chain");
    assert_eq!((swap_chain.width(), swap_chain.height()), (64, 64));
    assert_eq!(swap_chain.back_buffer_count(), 3);
    assert_eq!(swap_chain.format(), TextureFormat::Rgba8Unorm);

    for index in 0..3 {
        let back_buffer = device.back_buffer(index).unwrap();
        assert_eq!(back_buffer.width(), 64);
        assert_eq!(back_buffer.state(), ResourceState::Present);
    }
    assert!(matches!(device.back_buffer(3), Err(GraphicsError::State(_))));
}

#[test]
fn test_present_rotates_back_buffers() {
    let mut device = offscreen_device(16, 16);
    let indices: Vec<u32> = (0..6)
        .map(|_| {
            let index = device.back_buffer_index().unwrap();
            device.present().unwrap();
            index
        })
        .collect();
    assert_eq!(indices, [0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_resize_is_idempotent() {
    let mut device = offscreen_device(64, 64);

    assert!(!device.resize(64, 64).unwrap());
    assert!(device.resize(128, 32).unwrap());
    assert!(!device.resize(128, 32).unwrap());
    // Minimized windows report a zero size.
    assert!(!device.resize(0, 32).unwrap());

    let back_buffer = device.back_buffer(0).unwrap();
    assert_eq!((back_buffer.width(), back_buffer.height()), (128, 32));
}

#[test]
fn test_failed_resize_keeps_previous_back_buffers() {
    let mut device = offscreen_device(64, 32);

    assert!(matches!(
        device.resize(100_000, 8),
        Err(GraphicsError::ResourceCreation(_))
    ));
    let swap_chain = device.swap_chain().expect("primary swap chain");
    assert_eq!((swap_chain.width(), swap_chain.height()), (64, 32));
    assert_eq!(swap_chain.back_buffer_count(), 3);
    let back_buffer = device.back_buffer(0).unwrap();
    assert_eq!((back_buffer.width(), back_buffer.height()), (64, 32));
    assert_eq!(back_buffer.state(), ResourceState::Present);

    // The old buffers stay usable.
    device.present().unwrap();
    assert!(device.resize(32, 16).unwrap());
    let swap_chain = device.swap_chain().expect("primary swap chain");
    assert_eq!((swap_chain.width(), swap_chain.height()), (32, 16));
    assert_eq!(device.back_buffer(2).unwrap().width(), 32);
}

#[test]
fn test_render_into_back_buffer_and_present() {
    let mut device = offscreen_device(16, 16);
    let mut list = device.create_command_list().unwrap();

    for _ in 0..4 {
        let index = device.back_buffer_index().unwrap();
        let back_buffer = device.back_buffer(index).unwrap();
        list.reset().unwrap();
        list.transition(back_buffer, ResourceState::RenderTarget).unwrap();
        list.set_render_targets(&[back_buffer], None).unwrap();
        list.set_viewports(&[Viewport::from_dimensions(16, 16)]).unwrap();
        list.set_scissor_rects(&[ScissorRect::from_dimensions(16, 16)]).unwrap();
        list.clear_render_target(back_buffer, ClearColor::new(1.0, 0.0, 0.0, 1.0))
            .unwrap();
        list.transition(back_buffer, ResourceState::Present).unwrap();
        list.close().unwrap();
        device.execute_command_lists(&[&list]).unwrap();
        device.present().unwrap();
        device.wait_for_idle().unwrap();

        let swap_chain = device.swap_chain().expect("primary swap chain");
        assert!(device.back_buffer_index().unwrap() < swap_chain.back_buffer_count());
        assert_ne!(device.back_buffer_index().unwrap(), index);
    }
}

#[test]
fn test_headless_device_has_no_swap_chain() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut device = create_device(&DeviceCreationParams::new(GraphicsApi::Dummy)).unwrap();
    assert!(device.swap_chain().is_none());
    assert!(matches!(device.present(), Err(GraphicsError::State(_))));
    assert!(matches!(device.resize(8, 8), Err(GraphicsError::State(_))));
}

#[test]
fn test_additional_swap_chain() {
    let device = offscreen_device(32, 32);
    let mut swap_chain = device
        .create_swap_chain(&SwapChainDescriptor {
            window: None,
            width: 48,
            height: 24,
            buffer_count: 9,
            format: TextureFormat::Bgra8Unorm,
            vsync: false,
            fullscreen: false,
        })
        .unwrap();
    // Clamped to the maximum.
    assert_eq!(swap_chain.back_buffer_count(), 4);
    assert_eq!(device.statistics().textures, 3 + 4);

    swap_chain.set_fullscreen(true).unwrap();
    assert!(swap_chain.is_fullscreen());
    swap_chain.present().unwrap();
    device.destroy_swap_chain(swap_chain).unwrap();
    assert_eq!(device.statistics().textures, 3);
}

#[test]
fn test_frame_renderer_clears_and_presents() {
    let mut device = offscreen_device(8, 8);
    let mut renderer = FrameRenderer::new(&device, 2)
        .unwrap()
        .with_clear_color(ClearColor::new(0.0, 0.0, 1.0, 1.0));

    for _ in 0..4 {
        let index = device.back_buffer_index().unwrap();
        renderer.begin_frame(&device).unwrap();
        assert_eq!(device.back_buffer(index).unwrap().state(), ResourceState::RenderTarget);
        renderer.end_frame(&mut device).unwrap();
        assert_eq!(device.back_buffer(index).unwrap().state(), ResourceState::Present);
    }
    renderer.wait_idle().unwrap();
    assert_eq!(renderer.frame_count(), 4);
    assert_eq!(renderer.frames_in_flight(), 2);

    // Read the last presented back buffer through a staging copy.
    let last = (device.back_buffer_index().unwrap() + 2) % 3;
    let back_buffer = device.back_buffer(last).unwrap();
    let mut staging = device
        .create_texture(&TextureDescriptor::staging_2d(8, 8, TextureFormat::Rgba8Unorm), None)
        .unwrap();
    let mut list = device.create_command_list().unwrap();
    list.reset().unwrap();
    list.copy_texture(back_buffer, &staging).unwrap();
    list.transition(back_buffer, ResourceState::Present).unwrap();
    list.close().unwrap();
    device.execute_command_lists(&[&list]).unwrap();
    device.wait_for_idle().unwrap();

    let pixels = staging.map().unwrap().to_vec();
    assert_eq!(rgba8_at(&pixels, 8, 4, 4), [0, 0, 255, 255]);
}

#[test]
fn test_frame_renderer_rejects_nested_frames() {
    let mut device = offscreen_device(8, 8);
    let mut renderer = FrameRenderer::new(&device, 1).unwrap();
    renderer.begin_frame(&device).unwrap();
    assert!(matches!(renderer.begin_frame(&device), Err(GraphicsError::State(_))));
    renderer.end_frame(&mut device).unwrap();
    assert!(matches!(renderer.end_frame(&mut device), Err(GraphicsError::State(_))));
}
