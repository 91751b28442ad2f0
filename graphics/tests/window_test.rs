//! Window and swap chain integration test.
//!
//! Creates a real window, builds a device with a primary swap chain for it and
//! renders a few frames through [`FrameRenderer`], resizing the swap chain
//! with the window.
//!
//! # CI Compatibility
//!
//! If window creation fails (e.g., on headless CI systems) or the backend is
//! unavailable, the test passes gracefully.
//!
//! # Running This Test
//!
//! ```bash
//! cargo test --test window_test
//! ```

mod common;

use rstest::rstest;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
#[cfg(target_os = "windows")]
use winit::platform::windows::EventLoopBuilderExtWindows;
use winit::window::{Window, WindowId};

use common::Backend;
use keystone_graphics::{
    ClearColor, DeviceCreationParams, FrameRenderer, GraphicsDevice, NativeWindow, ResourceState,
    create_device,
};

/// Number of frames to render before exiting.
const FRAMES_TO_RENDER: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestResult {
    Running,
    Passed,
    /// Window or device not available.
    Skipped,
    Failed,
}

struct WindowTestApp {
    backend: Backend,
    result: TestResult,
    window: Option<Window>,
    device: Option<GraphicsDevice>,
    renderer: Option<FrameRenderer>,
    window_size: (u32, u32),
}

impl WindowTestApp {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            result: TestResult::Running,
            window: None,
            device: None,
            renderer: None,
            window_size: (320, 240),
        }
    }

    fn init_graphics(&mut self) -> bool {
        let Some(window) = &self.window else {
            log::warn!("No window available for graphics init");
            return false;
        };
        let native = match NativeWindow::from_window(window) {
            Ok(native) => native,
            Err(e) => {
                log::warn!("Window handles unavailable: {}", e);
                return false;
            }
        };

        let params = DeviceCreationParams::new(self.backend.api())
            .with_window(native, self.window_size.0, self.window_size.1)
            .with_debug_layer(false)
            .with_vsync(true);
        let device = match create_device(&params) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Failed to create {:?} device for the window: {}", self.backend, e);
                return false;
            }
        };
        let renderer = match FrameRenderer::new(&device, 2) {
            Ok(renderer) => renderer,
            Err(e) => {
                log::warn!("Failed to create frame renderer: {}", e);
                return false;
            }
        };

        log::info!(
            "Graphics initialized: {} ({}x{})",
            device.name(),
            self.window_size.0,
            self.window_size.1
        );
        self.device = Some(device);
        self.renderer = Some(renderer);
        true
    }

    fn render_frame(&mut self) -> bool {
        let (Some(device), Some(renderer)) = (&mut self.device, &mut self.renderer) else {
            return false;
        };

        let hue = (renderer.frame_count() as f32 / FRAMES_TO_RENDER as f32) * 360.0;
        let (r, g, b) = hue_to_rgb(hue);
        let result = renderer.begin_frame(device).and_then(|list| {
            let back_buffer = device.back_buffer(device.back_buffer_index()?)?;
            list.clear_render_target(back_buffer, ClearColor::new(r, g, b, 1.0))
        });
        if let Err(e) = result.and_then(|()| renderer.end_frame(device)) {
            log::warn!("Frame failed: {}", e);
            return false;
        }

        // Every back buffer is either untouched or presented between frames.
        let presented = device.swap_chain().is_some_and(|swap_chain| {
            (0..swap_chain.back_buffer_count()).all(|index| {
                swap_chain
                    .back_buffer(index)
                    .is_ok_and(|back_buffer| back_buffer.state() == ResourceState::Present)
            })
        });
        log::info!(
            "Frame {} rendered (clear color: RGB({:.2}, {:.2}, {:.2}))",
            renderer.frame_count(),
            r,
            g,
            b
        );
        presented
    }

    fn is_complete(&self) -> bool {
        !matches!(self.result, TestResult::Running)
    }
}

impl ApplicationHandler for WindowTestApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attributes = Window::default_attributes()
            .with_title("Keystone Window Test")
            .with_inner_size(winit::dpi::PhysicalSize::new(self.window_size.0, self.window_size.1))
            .with_visible(true);

        match event_loop.create_window(window_attributes) {
            Ok(window) => {
                log::info!("Test window created successfully");
                let size = window.inner_size();
                self.window_size = (size.width.max(1), size.height.max(1));
                self.window = Some(window);
                if !self.init_graphics() {
                    log::info!("Graphics initialization failed, skipping test");
                    self.result = TestResult::Skipped;
                    event_loop.exit();
                }
            }
            Err(e) => {
                log::info!("Window creation failed (expected on CI): {}", e);
                self.result = TestResult::Skipped;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.result = TestResult::Failed;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.window_size = (size.width, size.height);
                if let Some(device) = &mut self.device
                    && let Err(e) = device.resize(size.width, size.height)
                {
                    log::warn!("Swap chain resize failed: {}", e);
                    self.result = TestResult::Failed;
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if self.renderer.is_some() {
                    if !self.render_frame() {
                        log::warn!("Frame rendering failed");
                        self.result = TestResult::Failed;
                        event_loop.exit();
                        return;
                    }

                    let frames = self.renderer.as_ref().map_or(0, FrameRenderer::frame_count);
                    if frames >= FRAMES_TO_RENDER {
                        log::info!(
                            "Successfully rendered {} frames, test passed!",
                            FRAMES_TO_RENDER
                        );
                        self.result = TestResult::Passed;
                        if let Some(renderer) = &self.renderer
                            && let Err(e) = renderer.wait_idle()
                        {
                            log::warn!("wait_idle failed: {}", e);
                            self.result = TestResult::Failed;
                        }
                        event_loop.exit();
                        return;
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Convert hue (0-360) to RGB (0-1).
fn hue_to_rgb(hue: f32) -> (f32, f32, f32) {
    let h = hue / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();

    match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    }
}

/// Run the window test with event pumping.
///
/// Returns true if the test passed or was skipped.
fn run_window_test(backend: Backend) -> bool {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    if !backend.is_available() {
        log::info!("Backend {:?} not compiled in, skipping", backend);
        return true;
    }
    log::info!("Starting window integration test with backend {:?}", backend);

    // Tests run on worker threads.
    #[cfg(target_os = "windows")]
    let event_loop = EventLoop::builder().with_any_thread(true).build();
    #[cfg(not(target_os = "windows"))]
    let event_loop = match std::panic::catch_unwind(EventLoop::new) {
        Ok(event_loop) => event_loop,
        Err(_) => {
            log::info!("Event loop creation panicked (non-main thread), skipping");
            return true;
        }
    };
    let mut event_loop = match event_loop {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::info!("Event loop creation failed (expected on CI): {}", e);
            return true;
        }
    };

    let mut app = WindowTestApp::new(backend);
    let max_iterations = 1000;
    let mut iterations = 0;
    loop {
        match event_loop.pump_app_events(None, &mut app) {
            PumpStatus::Exit(_code) => break,
            PumpStatus::Continue => {
                if app.is_complete() {
                    break;
                }
                iterations += 1;
                if iterations >= max_iterations {
                    log::warn!("Test timed out after {} iterations", max_iterations);
                    app.result = TestResult::Failed;
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }

    if let Some(renderer) = &app.renderer {
        let _ = renderer.wait_idle();
    }
    match app.result {
        TestResult::Passed => true,
        TestResult::Skipped => {
            log::info!("Window test SKIPPED (no display available)");
            true
        }
        TestResult::Failed | TestResult::Running => {
            log::error!("Window test FAILED ({:?})", app.result);
            false
        }
    }
}

#[rstest]
#[case::vulkan(Backend::Vulkan)]
#[case::d3d12(Backend::D3D12)]
fn test_window_swap_chain_5_frames(#[case] backend: Backend) {
    assert!(
        run_window_test(backend),
        "Window swap chain test failed - see log for details"
    );
}
