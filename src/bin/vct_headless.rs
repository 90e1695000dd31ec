//! Headless voxel cone tracing of a small test room.
//!
//! Usage: cargo run --release --bin vct_headless -- [OPTIONS]
//!
//! Options:
//!   --gpu               Run the passes with wgpu instead of on the host
//!   --config <PATH>     JSON config (default: built-in defaults)
//!   --height <H>        Octree height override
//!   --frames <N>        Frames to trace, rotating the light each frame (default: 1)
//!   --out <PATH>        Indirect light PNG (default: "vct_indirect.png")
//!   --ao <PATH>         Ambient visibility PNG
//!   --debug <PATH>      Brick debug view PNG (GPU only)

use std::path::{Path, PathBuf};
use std::time::Instant;

use glam::{UVec2, Vec3, Vec4};

use voxgi::core::config::VctConfig;
use voxgi::core::error::Error;
use voxgi::core::logging;
use voxgi::core::types::Result;
use voxgi::gi::{DebugDrawMode, GiBackend, HostFrame, HostShadowMap, SoftwareBackend, VoxelConeTracer};
use voxgi::render::{
    FramePacer, GpuContext, GpuDebugTarget, GpuFrame, GpuMesh, GpuShadowMap, QueueMarker, WgpuBackend,
};
use voxgi::scene::{Camera, CameraMatrices, DirectionalLight, SceneBoundsTracker, StaticMesh};
use voxgi::voxel::VoxelGrid;

const FRAME_SIZE: u32 = 256;
const SHADOW_SIZE: u32 = 512;

struct Options {
    gpu: bool,
    config: VctConfig,
    frames: u32,
    out: PathBuf,
    ao: Option<PathBuf>,
    debug: Option<PathBuf>,
}

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = parse_options(&args).and_then(|options| run(&options)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut config = match parse_str_arg(args, "--config") {
        Some(path) => VctConfig::load(Path::new(&path))?,
        None => VctConfig::default(),
    };
    if let Some(height) = parse_u32_arg(args, "--height") {
        config.octree_height = height;
        config.validate()?;
    }

    Ok(Options {
        gpu: args.iter().any(|a| a == "--gpu"),
        config,
        frames: parse_u32_arg(args, "--frames").unwrap_or(1).max(1),
        out: parse_str_arg(args, "--out").map_or_else(|| PathBuf::from("vct_indirect.png"), PathBuf::from),
        ao: parse_str_arg(args, "--ao").map(PathBuf::from),
        debug: parse_str_arg(args, "--debug").map(PathBuf::from),
    })
}

/// Open box with a colored left and right wall and a block on the floor.
fn test_room() -> Vec<StaticMesh> {
    let white = Vec4::new(0.8, 0.8, 0.8, 1.0);
    let red = Vec4::new(0.8, 0.1, 0.1, 1.0);
    let green = Vec4::new(0.1, 0.8, 0.1, 1.0);
    let s = 5.0;
    vec![
        // floor
        StaticMesh::quad(
            [
                Vec3::new(-s, 0.0, s),
                Vec3::new(s, 0.0, s),
                Vec3::new(s, 0.0, -s),
                Vec3::new(-s, 0.0, -s),
            ],
            white,
        ),
        // back wall
        StaticMesh::quad(
            [
                Vec3::new(-s, 0.0, -s),
                Vec3::new(s, 0.0, -s),
                Vec3::new(s, 2.0 * s, -s),
                Vec3::new(-s, 2.0 * s, -s),
            ],
            white,
        ),
        // left wall
        StaticMesh::quad(
            [
                Vec3::new(-s, 0.0, s),
                Vec3::new(-s, 0.0, -s),
                Vec3::new(-s, 2.0 * s, -s),
                Vec3::new(-s, 2.0 * s, s),
            ],
            red,
        ),
        // right wall
        StaticMesh::quad(
            [
                Vec3::new(s, 0.0, -s),
                Vec3::new(s, 0.0, s),
                Vec3::new(s, 2.0 * s, s),
                Vec3::new(s, 2.0 * s, -s),
            ],
            green,
        ),
        StaticMesh::cuboid(Vec3::new(1.0, 1.5, -1.0), Vec3::new(1.5, 1.5, 1.5), white),
    ]
}

fn light_for_frame(frame: u32) -> DirectionalLight {
    let angle = frame as f32 * 0.05;
    let direction = Vec3::new(0.4 * angle.cos(), -1.0, 0.3 + 0.4 * angle.sin()).normalize();
    DirectionalLight::new(direction, Vec3::ONE)
}

fn run(options: &Options) -> Result<()> {
    let meshes = test_room();
    let mut bounds = SceneBoundsTracker::new(options.config.bounds_padding);
    for mesh in &meshes {
        bounds.add_mesh(mesh);
    }
    let camera = Camera::look_at(Vec3::new(0.0, 5.0, 14.0), Vec3::new(0.0, 4.0, 0.0), Vec3::Y, 1.0).matrices();

    println!("=== Voxel Cone Tracing ===");
    println!("Backend: {}", if options.gpu { "wgpu" } else { "software" });
    println!("Height:  {}", options.config.octree_height);
    println!("Frames:  {}", options.frames);
    println!();

    let output = if options.gpu {
        run_gpu(options, &meshes, bounds, camera)?
    } else {
        run_software(options, &meshes, bounds, camera)?
    };

    let size = UVec2::from(options.config.cone_tracing_res);
    write_png(&options.out, size, &output, |p| p.truncate().to_array())?;
    println!("Wrote {}", options.out.display());
    if let Some(path) = &options.ao {
        write_png(path, size, &output, |p| [p.w; 3])?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn shadow_camera(grid: &VoxelGrid, light: &DirectionalLight) -> CameraMatrices {
    CameraMatrices::for_directional_light(light, &grid.bounds())
}

fn run_software(
    options: &Options,
    meshes: &[StaticMesh],
    mut bounds: SceneBoundsTracker,
    camera: CameraMatrices,
) -> Result<Vec<Vec4>> {
    let mut tracer = VoxelConeTracer::new(options.config.clone(), SoftwareBackend::new);
    let start = Instant::now();
    tracer.voxelize_static_scene(meshes, &mut bounds)?;
    println!("Octree: {} nodes in {:.1?}", tracer.node_count(), start.elapsed());

    let grid = *tracer.grid().ok_or_else(|| Error::Voxel("no grid after voxelization".into()))?;
    let frame = HostFrame::render(meshes, camera, FRAME_SIZE, FRAME_SIZE);
    for i in 0..options.frames {
        let light = light_for_frame(i);
        let shadow = HostShadowMap::render(meshes, shadow_camera(&grid, &light), SHADOW_SIZE, SHADOW_SIZE);
        let start = Instant::now();
        tracer.update_lighting(&light, &shadow)?;
        tracer.voxel_cone_tracing(&frame)?;
        log::info!("Frame {}: {:.1?}", i, start.elapsed());
    }

    let mut cubes = Vec::new();
    tracer.draw_buffers(DebugDrawMode::Bricks, &camera, &mut cubes)?;
    println!("Debug view: {} brick cubes", cubes.len());

    let backend = tracer
        .backend()
        .ok_or_else(|| Error::Voxel("software backend unavailable".into()))?;
    println!("Passes: {:?}", backend.stats());
    Ok(backend.output().to_vec())
}

fn run_gpu(
    options: &Options,
    meshes: &[StaticMesh],
    mut bounds: SceneBoundsTracker,
    camera: CameraMatrices,
) -> Result<Vec<Vec4>> {
    let context = pollster::block_on(GpuContext::new(&options.config))?;
    let device = context.device.clone();
    let queue = context.queue.clone();
    let mut tracer = VoxelConeTracer::new(options.config.clone(), |config| {
        WgpuBackend::new(device.clone(), queue.clone(), config)
    });
    let backend = tracer
        .backend()
        .ok_or_else(|| Error::Gpu("wgpu backend unavailable".into()))?;
    let gpu_meshes: Vec<GpuMesh> = meshes.iter().map(|m| GpuMesh::upload(backend.factory(), m)).collect();

    let start = Instant::now();
    tracer.voxelize_static_scene(&gpu_meshes, &mut bounds)?;
    println!("Octree: {} nodes in {:.1?}", tracer.node_count(), start.elapsed());

    let grid = *tracer.grid().ok_or_else(|| Error::Voxel("no grid after voxelization".into()))?;
    let backend = tracer
        .backend()
        .ok_or_else(|| Error::Gpu("wgpu backend unavailable".into()))?;
    let host_frame = HostFrame::render(meshes, camera, FRAME_SIZE, FRAME_SIZE);
    let frame = GpuFrame::from_host(backend.factory(), &queue, &host_frame);

    let mut pacer = FramePacer::new();
    for i in 0..options.frames {
        pacer.begin_frame()?;
        let light = light_for_frame(i);
        let host_shadow = HostShadowMap::render(meshes, shadow_camera(&grid, &light), SHADOW_SIZE, SHADOW_SIZE);
        let backend = tracer
            .backend()
            .ok_or_else(|| Error::Gpu("wgpu backend unavailable".into()))?;
        let shadow = GpuShadowMap::from_host(backend.factory(), &queue, &host_shadow);

        tracer.update_lighting(&light, &shadow)?;
        tracer.voxel_cone_tracing(&frame)?;
        if let Some(index) = tracer.backend().and_then(WgpuBackend::last_submission) {
            pacer.end_frame(QueueMarker::new(device.clone(), index));
        }
    }
    pacer.finish()?;
    log::info!("Traced {} frames, {} pacing waits", options.frames, pacer.waits());

    if let Some(path) = &options.debug {
        let size = UVec2::splat(FRAME_SIZE);
        let backend = tracer
            .backend()
            .ok_or_else(|| Error::Gpu("wgpu backend unavailable".into()))?;
        let mut target = GpuDebugTarget::new(backend.factory(), size);
        tracer.draw_buffers(DebugDrawMode::Bricks, &camera, &mut target)?;
        let rgba = target.read_rgba8(&device, &queue)?;
        save_rgba8(path, size, rgba)?;
        println!("Wrote {}", path.display());
    }

    let backend = tracer
        .backend_mut()
        .ok_or_else(|| Error::Gpu("wgpu backend unavailable".into()))?;
    backend.submit()?;
    let output = backend.read_output()?;
    Ok(output.into_iter().map(Vec4::from_array).collect())
}

fn write_png(path: &Path, size: UVec2, pixels: &[Vec4], rgb: impl Fn(Vec4) -> [f32; 3]) -> Result<()> {
    let bytes = pixels
        .iter()
        .flat_map(|&p| {
            let [r, g, b] = rgb(p).map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
            [r, g, b, 255]
        })
        .collect();
    save_rgba8(path, size, bytes)
}

fn save_rgba8(path: &Path, size: UVec2, bytes: Vec<u8>) -> Result<()> {
    let image = image::RgbaImage::from_raw(size.x, size.y, bytes)
        .ok_or_else(|| Error::Readback(format!("pixel count does not match {}x{}", size.x, size.y)))?;
    image
        .save(path)
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    parse_str_arg(args, flag).and_then(|s| s.parse().ok())
}
