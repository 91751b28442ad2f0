use criterion::{Criterion, black_box, criterion_group, criterion_main};

use keystone_graphics::{
    BindFlags, BufferDescriptor, ClearColor, DeviceCreationParams, GraphicsApi, GraphicsDevice,
    ResourceState, ResourceUsage, ShaderDescriptor, TextureDescriptor, TextureFormat,
    create_device,
};

const SHADER: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    let y = f32(i32(index & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

fn dummy_device() -> GraphicsDevice {
    create_device(&DeviceCreationParams::new(GraphicsApi::Dummy)).unwrap()
}

// ---------------------------------------------------------------------------
// Command recording and submission
// ---------------------------------------------------------------------------

fn bench_record_barriers(c: &mut Criterion) {
    let device = dummy_device();
    let texture = device
        .create_texture(
            &TextureDescriptor::render_target(64, 64, TextureFormat::Rgba8Unorm),
            None,
        )
        .unwrap();
    let mut list = device.create_command_list().unwrap();

    c.bench_function("record_64_barriers", |b| {
        b.iter(|| {
            list.reset().unwrap();
            for _ in 0..32 {
                list.transition(&texture, ResourceState::CopySource).unwrap();
                list.transition(&texture, ResourceState::RenderTarget).unwrap();
            }
            list.close().unwrap();
            black_box(&list);
        });
    });
}

fn bench_submit_clear(c: &mut Criterion) {
    let device = dummy_device();
    let texture = device
        .create_texture(
            &TextureDescriptor::render_target(256, 256, TextureFormat::Rgba8Unorm),
            None,
        )
        .unwrap();
    let mut list = device.create_command_list().unwrap();

    c.bench_function("submit_clear_256x256", |b| {
        b.iter(|| {
            list.reset().unwrap();
            list.clear_render_target(&texture, ClearColor::new(0.2, 0.4, 0.6, 1.0))
                .unwrap();
            list.close().unwrap();
            device.execute_command_lists(&[&list]).unwrap();
        });
    });
}

fn bench_submit_batched(c: &mut Criterion) {
    let device = dummy_device();
    let texture = device
        .create_texture(
            &TextureDescriptor::render_target(16, 16, TextureFormat::Rgba8Unorm),
            None,
        )
        .unwrap();
    let mut lists: Vec<_> = (0..8).map(|_| device.create_command_list().unwrap()).collect();

    c.bench_function("submit_8_lists_batched", |b| {
        b.iter(|| {
            for list in &mut lists {
                list.reset().unwrap();
                list.clear_render_target(&texture, ClearColor::BLACK).unwrap();
                list.close().unwrap();
            }
            let refs: Vec<_> = lists.iter().collect();
            device.execute_command_lists(&refs).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Resource creation
// ---------------------------------------------------------------------------

fn bench_dummy_create_buffer(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("dummy_create_buffer_1kb", |b| {
        b.iter(|| {
            black_box(
                device
                    .create_buffer(
                        &BufferDescriptor::new(
                            1024,
                            ResourceUsage::Default,
                            BindFlags::VERTEX_BUFFER,
                        ),
                        None,
                    )
                    .unwrap(),
            );
        });
    });
}

fn bench_dummy_create_texture(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("dummy_create_texture_256x256", |b| {
        b.iter(|| {
            black_box(
                device
                    .create_texture(
                        &TextureDescriptor::new_2d(
                            256,
                            256,
                            TextureFormat::Rgba8Unorm,
                            BindFlags::SHADER_RESOURCE,
                        ),
                        None,
                    )
                    .unwrap(),
            );
        });
    });
}

fn bench_compile_shader(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("compile_wgsl_vertex_shader", |b| {
        b.iter(|| {
            black_box(
                device
                    .create_shader(&ShaderDescriptor::vertex(SHADER, "vs_main"))
                    .unwrap(),
            );
        });
    });
}

criterion_group!(
    benches,
    bench_record_barriers,
    bench_submit_clear,
    bench_submit_batched,
    bench_dummy_create_buffer,
    bench_dummy_create_texture,
    bench_compile_shader,
);
criterion_main!(benches);
