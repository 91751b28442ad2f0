//! # Triangle
//!
//! Opens a window and draws a colored triangle every frame through
//! [`FrameRenderer`].
//!
//! ```bash
//! cargo run --example triangle
//! KEYSTONE_API=d3d12 cargo run --example triangle --features d3d12-backend
//! ```

use keystone_graphics::{
    Buffer, BufferDescriptor, ClearColor, DeviceCreationParams, FrameRenderer, GraphicsApi,
    GraphicsDevice, GraphicsResult, InputElement, NativeWindow, PipelineState,
    PipelineStateDescriptor, ResourceUsage, ShaderDescriptor, VertexFormat, create_device,
};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

const SHADER: &str = r#"
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

#[rustfmt::skip]
const VERTICES: [f32; 21] = [
    0.0, 0.5, 0.0,    1.0, 0.0, 0.0, 1.0,
    0.5, -0.5, 0.0,   0.0, 1.0, 0.0, 1.0,
    -0.5, -0.5, 0.0,  0.0, 0.0, 1.0, 1.0,
];

const STRIDE: u32 = 7 * 4;

/// Everything that lives as long as the window.
struct Renderer {
    frames: FrameRenderer,
    pipeline: PipelineState,
    vertices: Buffer,
    device: GraphicsDevice,
}

impl Renderer {
    fn new(api: GraphicsApi, window: &Window) -> GraphicsResult<Self> {
        let size = window.inner_size();
        let device = create_device(
            &DeviceCreationParams::new(api)
                .with_window(NativeWindow::from_window(window)?, size.width, size.height),
        )?;
        log::info!("Using {} ({})", device.name(), device.api());

        let swap_chain_format = device
            .swap_chain()
            .map(|swap_chain| swap_chain.format())
            .unwrap_or_default();
        let pipeline = device.create_pipeline_state(
            &PipelineStateDescriptor::graphics(
                ShaderDescriptor::vertex(SHADER, "vs_main"),
                ShaderDescriptor::pixel(SHADER, "ps_main"),
            )
            .with_label("triangle")
            .with_input_layout(vec![
                InputElement::new("POSITION", VertexFormat::Float32x3, 0, 0),
                InputElement::new("COLOR", VertexFormat::Float32x4, 0, 12),
            ])
            .with_render_target(swap_chain_format),
        )?;

        let bytes: &[u8] = bytemuck::cast_slice(&VERTICES);
        let vertices = device.create_buffer(
            &BufferDescriptor::vertex(bytes.len() as u64, STRIDE, ResourceUsage::Immutable)
                .with_label("triangle vertices"),
            Some(bytes),
        )?;
        let frames = FrameRenderer::new(&device, 2)?
            .with_clear_color(ClearColor::new(0.1, 0.1, 0.15, 1.0));

        Ok(Self {
            frames,
            pipeline,
            vertices,
            device,
        })
    }

    fn render(&mut self) -> GraphicsResult<()> {
        let list = self.frames.begin_frame(&self.device)?;
        list.set_pipeline_state(&self.pipeline)?;
        list.set_vertex_buffers(0, &[&self.vertices])?;
        list.draw(3, 1, 0, 0)?;
        self.frames.end_frame(&mut self.device)
    }
}

struct App {
    api: GraphicsApi,
    /// Dropped before the window it presents to.
    renderer: Option<Renderer>,
    window: Option<Window>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attributes = Window::default_attributes()
            .with_title("Keystone Triangle")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        match Renderer::new(self.api, &window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize {}: {}", self.api, e);
                event_loop.exit();
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                if let Some(renderer) = &self.renderer
                    && let Err(e) = renderer.frames.wait_idle()
                {
                    log::warn!("wait_idle failed: {}", e);
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer
                    && let Err(e) = renderer.device.resize(size.width, size.height)
                {
                    log::error!("Resize failed: {}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = &mut self.renderer
                    && let Err(e) = renderer.render()
                {
                    log::error!("Frame failed: {}", e);
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let api = match std::env::var("KEYSTONE_API") {
        Ok(name) => name.parse().unwrap_or_else(|e| {
            log::warn!("{}, falling back to Vulkan", e);
            GraphicsApi::Vulkan
        }),
        Err(_) => GraphicsApi::Vulkan,
    };
    log::info!("Starting Keystone triangle (graphics {})", keystone_graphics::VERSION);

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut app = App {
        api,
        renderer: None,
        window: None,
    };
    event_loop.run_app(&mut app).expect("Event loop error");
}
