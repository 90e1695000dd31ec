use criterion::{criterion_group, criterion_main, Criterion, black_box};

use voxgi::core::config::VctConfig;
use voxgi::gi::{HostFrame, HostShadowMap, SoftwareBackend, VoxelConeTracer};
use voxgi::scene::{Camera, CameraMatrices, DirectionalLight, SceneBoundsTracker, StaticMesh};

use glam::{Vec3, Vec4};

fn scene() -> Vec<StaticMesh> {
    let grey = Vec4::new(0.8, 0.8, 0.8, 1.0);
    vec![
        StaticMesh::cuboid(Vec3::new(0.0, -0.5, 0.0), Vec3::new(8.0, 0.5, 8.0), grey),
        StaticMesh::cube(Vec3::new(-2.0, 1.5, 1.0), 1.5, grey),
        StaticMesh::cube(Vec3::new(3.0, 1.0, -2.0), 1.0, grey),
    ]
}

fn config(height: u32) -> VctConfig {
    VctConfig {
        octree_height: height,
        octree_buffer_res: 256,
        brick_buffer_res: 123,
        fragment_capacity: 1 << 18,
        cone_tracing_res: [64, 64],
        ..Default::default()
    }
}

fn built_tracer(meshes: &[StaticMesh], height: u32) -> VoxelConeTracer<SoftwareBackend> {
    let mut bounds = SceneBoundsTracker::new(1.5);
    for mesh in meshes {
        bounds.add_mesh(mesh);
    }
    let mut tracer = VoxelConeTracer::new(config(height), SoftwareBackend::new);
    tracer
        .voxelize_static_scene(meshes, &mut bounds)
        .expect("build failed");
    tracer
}

fn bench_octree_build(c: &mut Criterion) {
    let meshes = scene();
    for height in [4u32, 5, 6] {
        c.bench_function(&format!("octree_build_h{}", height), |b| {
            b.iter(|| built_tracer(black_box(&meshes), height).node_count());
        });
    }
}

fn bench_light_injection(c: &mut Criterion) {
    let meshes = scene();
    let mut tracer = built_tracer(&meshes, 5);
    let grid = *tracer.grid().expect("no grid");

    c.bench_function("light_injection_h5", |b| {
        let mut frame = 0u32;
        b.iter(|| {
            frame += 1;
            let angle = frame as f32 * 0.01;
            let light = DirectionalLight::new(Vec3::new(angle.cos() * 0.3, -1.0, angle.sin() * 0.3).normalize(), Vec3::ONE);
            let camera = CameraMatrices::for_directional_light(&light, &grid.bounds());
            let shadow = HostShadowMap::render(&meshes, camera, 256, 256);
            tracer.update_lighting(black_box(&light), &shadow).expect("injection failed")
        });
    });
}

fn bench_cone_tracing(c: &mut Criterion) {
    let meshes = scene();
    let mut tracer = built_tracer(&meshes, 5);
    let light = DirectionalLight::new(Vec3::new(0.3, -1.0, 0.2).normalize(), Vec3::ONE);
    let grid = *tracer.grid().expect("no grid");
    let shadow = HostShadowMap::render(
        &meshes,
        CameraMatrices::for_directional_light(&light, &grid.bounds()),
        256,
        256,
    );
    tracer.update_lighting(&light, &shadow).expect("injection failed");
    let camera = Camera::look_at(Vec3::new(0.0, 6.0, 14.0), Vec3::ZERO, Vec3::Y, 1.0).matrices();
    let frame = HostFrame::render(&meshes, camera, 128, 128);

    c.bench_function("cone_tracing_64x64_h5", |b| {
        b.iter(|| tracer.voxel_cone_tracing(black_box(&frame)).expect("trace failed"));
    });
}

criterion_group!(benches, bench_octree_build, bench_light_injection, bench_cone_tracing);
criterion_main!(benches);
