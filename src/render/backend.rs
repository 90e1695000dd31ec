//! wgpu execution of the voxel cone tracing passes
//!
//! Passes are recorded into one pending encoder and flushed on
//! [`GiBackend::submit`]. Per-level parameters live in dynamic-offset
//! uniform slots written once per build, so every level of a build can be
//! recorded into the same submission.

use std::sync::Arc;

use crate::core::config::VctConfig;
use crate::core::error::Error;
use crate::core::types::{Mat4, Result, UVec2, Vec3};
use crate::gi::backend::{FrameSource, GiBackend, ShadowMapSource};
use crate::gi::params::{
    ConeTraceParams, DebugDrawParams, LightParams, OctreeParams, UNIFORM_SLOT_STRIDE, VoxelizeParams,
};
use crate::gi::software::{HostFrame, HostShadowMap};
use crate::math::Aabb;
use crate::render::context::BRICK_FORMAT;
use crate::render::pipeline::cone_trace::{CONE_OUTPUT_FORMAT, GBUFFER_DEPTH_FORMAT, GBUFFER_NORMAL_FORMAT};
use crate::render::pipeline::debug_draw::DebugSources;
use crate::render::pipeline::light::LightViews;
use crate::render::pipeline::octree::{SvoBindGroups, SvoBuffers};
use crate::render::pipeline::voxelize::{AxisVertexBuffers, VOXELIZE_TARGET_FORMAT};
use crate::render::pipeline::{
    BrickPipelines, ConeTracePipeline, DEBUG_COLOR_FORMAT, DEBUG_DEPTH_FORMAT, DebugDrawPipeline, LightPipelines,
    OctreePipelines, SvoBindings, UniformSlots, VoxelizePipeline,
};
use crate::render::readback;
use crate::render::resources::{ResourceFactory, ResourceRegistry};
use crate::scene::{CameraMatrices, StaticMesh};
use crate::voxel::indirect::{self, FRAGMENT_SLOT, IndirectArgsRecord};
use crate::voxel::{Axis, BrickTarget, BrickVolume, OctreeNode, OctreeSnapshot, VoxelFragment, VoxelGrid};

/// Static mesh uploaded as three vertex lists, one per dominant axis.
pub struct GpuMesh {
    buffers: [Arc<wgpu::Buffer>; 3],
    counts: [u32; 3],
}

impl GpuMesh {
    pub fn upload(factory: &ResourceFactory, mesh: &StaticMesh) -> Self {
        let bins = mesh.axis_binned_vertices();
        let counts = std::array::from_fn(|axis| bins[axis].len() as u32);
        let buffers = std::array::from_fn(|axis| {
            factory.buffer_init(
                "voxelize_vertices",
                bytemuck::cast_slice(&bins[axis]),
                wgpu::BufferUsages::VERTEX,
            )
        });
        Self { buffers, counts }
    }

    pub fn vertex_count(&self) -> u32 {
        self.counts.iter().sum()
    }

    fn axis_buffers(&self) -> AxisVertexBuffers<'_> {
        AxisVertexBuffers {
            buffers: [&self.buffers[0], &self.buffers[1], &self.buffers[2]],
            counts: self.counts,
        }
    }
}

fn texture_2d(
    factory: &ResourceFactory,
    label: &str,
    size: UVec2,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> (Arc<wgpu::Texture>, wgpu::TextureView) {
    let texture = factory.texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.x.max(1),
            height: size.y.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn brick_volume(factory: &ResourceFactory, label: &str, res: u32) -> (Arc<wgpu::Texture>, wgpu::TextureView) {
    let texture = factory.texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: res,
            height: res,
            depth_or_array_layers: res,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: BRICK_FORMAT,
        usage: wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn write_texels(queue: &wgpu::Queue, texture: &wgpu::Texture, data: &[u8], bytes_per_texel: u32) {
    let size = texture.size();
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.width * bytes_per_texel),
            rows_per_image: Some(size.height),
        },
        size,
    );
}

/// `R32Float` light-space depth of the directional light.
pub struct GpuShadowMap {
    texture: Arc<wgpu::Texture>,
    view: wgpu::TextureView,
    camera: CameraMatrices,
    size: UVec2,
}

impl GpuShadowMap {
    /// Empty shadow map for a renderer to copy its depth into.
    pub fn new(factory: &ResourceFactory, camera: CameraMatrices, size: UVec2) -> Self {
        let (texture, view) = texture_2d(
            factory,
            "shadow_depth",
            size,
            wgpu::TextureFormat::R32Float,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        Self { texture, view, camera, size }
    }

    pub fn from_host(factory: &ResourceFactory, queue: &wgpu::Queue, host: &HostShadowMap) -> Self {
        let shadow = Self::new(factory, host.camera, UVec2::new(host.width, host.height));
        write_texels(queue, &shadow.texture, bytemuck::cast_slice(&host.depth), 4);
        shadow
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl ShadowMapSource for GpuShadowMap {
    fn view_proj(&self) -> Mat4 {
        self.camera.view_proj()
    }

    fn size(&self) -> UVec2 {
        self.size
    }
}

/// G-buffer inputs of one frame: world normals and linear view depth.
pub struct GpuFrame {
    normal: Arc<wgpu::Texture>,
    normal_view: wgpu::TextureView,
    depth: Arc<wgpu::Texture>,
    depth_view: wgpu::TextureView,
    camera: CameraMatrices,
    size: UVec2,
}

impl GpuFrame {
    pub fn new(factory: &ResourceFactory, camera: CameraMatrices, size: UVec2) -> Self {
        let usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let (normal, normal_view) = texture_2d(factory, "gbuffer_normal", size, GBUFFER_NORMAL_FORMAT, usage);
        let (depth, depth_view) = texture_2d(factory, "gbuffer_depth", size, GBUFFER_DEPTH_FORMAT, usage);
        Self {
            normal,
            normal_view,
            depth,
            depth_view,
            camera,
            size,
        }
    }

    pub fn from_host(factory: &ResourceFactory, queue: &wgpu::Queue, host: &HostFrame) -> Self {
        let frame = Self::new(factory, host.camera, UVec2::new(host.width, host.height));
        let normals = normal_texels(&host.normals);
        write_texels(queue, &frame.normal, bytemuck::cast_slice(&normals), 8);
        write_texels(queue, &frame.depth, bytemuck::cast_slice(&host.linear_depth), 4);
        frame
    }

    pub fn normal_texture(&self) -> &wgpu::Texture {
        &self.normal
    }

    pub fn depth_texture(&self) -> &wgpu::Texture {
        &self.depth
    }
}

impl FrameSource for GpuFrame {
    fn camera(&self) -> &CameraMatrices {
        &self.camera
    }

    fn size(&self) -> UVec2 {
        self.size
    }
}

/// `Rgba16Float` texels of world normals, w = 0.
fn normal_texels(normals: &[Vec3]) -> Vec<u16> {
    normals
        .iter()
        .flat_map(|n| [n.x, n.y, n.z, 0.0])
        .map(|c| half::f16::from_f32(c).to_bits())
        .collect()
}

/// Color and depth attachments of the debug view.
pub struct GpuDebugTarget {
    color: Arc<wgpu::Texture>,
    color_view: wgpu::TextureView,
    _depth: Arc<wgpu::Texture>,
    depth_view: wgpu::TextureView,
}

impl GpuDebugTarget {
    pub fn new(factory: &ResourceFactory, size: UVec2) -> Self {
        let (color, color_view) = texture_2d(
            factory,
            "debug_color",
            size,
            DEBUG_COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let (depth, depth_view) = texture_2d(
            factory,
            "debug_depth",
            size,
            DEBUG_DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        Self {
            color,
            color_view,
            _depth: depth,
            depth_view,
        }
    }

    pub fn color_texture(&self) -> &wgpu::Texture {
        &self.color
    }

    /// Tightly packed RGBA8 rows.
    pub fn read_rgba8(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u8>> {
        readback::read_texture(device, queue, &self.color, 4)
    }
}

/// One brick volume and the bind group writing into it.
struct BrickStorage {
    texture: Arc<wgpu::Texture>,
    view: wgpu::TextureView,
    target: wgpu::BindGroup,
}

fn pending_encoder<'a>(
    encoder: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("vct_encoder"),
        })
    })
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    factory: ResourceFactory,
    config: VctConfig,

    octree: OctreePipelines,
    bricks: BrickPipelines,
    light: LightPipelines,
    cone: ConeTracePipeline,
    debug: DebugDrawPipeline,
    voxelizer: VoxelizePipeline,

    octree_params: UniformSlots,
    voxelize_params: UniformSlots,
    svo_groups: SvoBindGroups,
    voxelize_groups: [wgpu::BindGroup; 2],
    voxelize_target: wgpu::TextureView,
    cone_octree: wgpu::BindGroup,
    cone_volumes: wgpu::BindGroup,
    debug_groups: [wgpu::BindGroup; 2],
    light_group: Option<wgpu::BindGroup>,

    nodes: Arc<wgpu::Buffer>,
    fragments: Arc<wgpu::Buffer>,
    records: Arc<wgpu::Buffer>,
    seed_records: Arc<wgpu::Buffer>,
    pack_counter: Arc<wgpu::Buffer>,
    lit: Arc<wgpu::Buffer>,
    opacity: BrickStorage,
    irradiance: BrickStorage,
    output: Arc<wgpu::Texture>,
    output_view: wgpu::TextureView,

    _voxelize_target_texture: Arc<wgpu::Texture>,
    encoder: Option<wgpu::CommandEncoder>,
    last_submission: Option<wgpu::SubmissionIndex>,
    grid: Option<VoxelGrid>,
}

impl WgpuBackend {
    /// Allocate every buffer and pipeline for `config`. The adapter is
    /// expected to have passed [`crate::render::context::check_capabilities`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: &VctConfig) -> Result<Self> {
        config.validate()?;
        let factory = ResourceFactory::new(device.clone());
        let height = config.octree_height;
        let node_capacity = config.node_capacity() as u64;

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let nodes = factory.buffer(
            "svo_nodes",
            node_capacity * std::mem::size_of::<OctreeNode>() as u64,
            storage,
        );
        let fragments = factory.buffer(
            "voxel_fragments",
            config.fragment_capacity.max(1) as u64 * std::mem::size_of::<VoxelFragment>() as u64,
            storage,
        );
        let seed = indirect::cleared_records(height);
        let records = factory.buffer(
            "indirect_records",
            indirect::slot_offset(indirect::record_count(height)),
            storage | wgpu::BufferUsages::INDIRECT,
        );
        let seed_records = factory.buffer_init(
            "indirect_records_seed",
            bytemuck::cast_slice(&seed),
            wgpu::BufferUsages::COPY_SRC,
        );
        let pack_counter = factory.buffer("node_pack_counter", 4, storage);
        let lit = factory.buffer("node_lit_counts", node_capacity * 4, storage);

        let octree_params = UniformSlots::new(&factory, "octree_params", height);
        let voxelize_params = UniformSlots::new(&factory, "voxelize_params", 3);

        let bindings = SvoBindings::new(&device);
        let svo_groups = bindings.create_bind_groups(
            &device,
            &SvoBuffers {
                nodes: &nodes,
                fragments: &fragments,
                pack_counter: &pack_counter,
                lit: &lit,
                records: &records,
                params: &octree_params,
            },
        );

        let octree = OctreePipelines::new(&device, &bindings);
        let bricks = BrickPipelines::new(&device, &bindings);
        let light = LightPipelines::new(&device, &factory, &bindings);
        let cone = ConeTracePipeline::new(&device, &factory);
        let debug = DebugDrawPipeline::new(&device, &factory);
        let voxelizer = VoxelizePipeline::new(&device);

        let (opacity_texture, opacity_view) = brick_volume(&factory, "opacity_bricks", config.brick_buffer_res);
        let (irradiance_texture, irradiance_view) =
            brick_volume(&factory, "irradiance_bricks", config.brick_buffer_res);
        let opacity = BrickStorage {
            target: bricks.create_target_bind_group(&device, &opacity_view),
            texture: opacity_texture,
            view: opacity_view,
        };
        let irradiance = BrickStorage {
            target: bricks.create_target_bind_group(&device, &irradiance_view),
            texture: irradiance_texture,
            view: irradiance_view,
        };

        let resolution = config.voxel_resolution();
        let (voxelize_target_texture, voxelize_target) = texture_2d(
            &factory,
            "voxelize_target",
            UVec2::splat(resolution),
            VOXELIZE_TARGET_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let voxelize_groups = voxelizer.create_bind_groups(&device, &fragments, &records, &voxelize_params);

        let (output, output_view) = Self::create_output(&factory, UVec2::from(config.cone_tracing_res));
        let cone_octree = cone.create_octree_bind_group(&device, &nodes);
        let cone_volumes = cone.create_volume_bind_group(&device, &opacity.view, &irradiance.view);
        let debug_groups = debug.create_bind_groups(
            &device,
            &DebugSources {
                nodes: &nodes,
                fragments: &fragments,
                opacity: &opacity.view,
                irradiance: &irradiance.view,
            },
        );

        // Until the first build, slots describe a unit grid so passes that
        // run before voxelization read sane capacities.
        let placeholder = VoxelGrid::new(Aabb::new(Vec3::ZERO, Vec3::ONE), height);
        for level in 0..height {
            octree_params.write(&queue, level, &OctreeParams::for_level(&placeholder, config, level));
        }

        log::info!(
            "GPU backend: {} MB nodes, {} MB fragments, {}^3 brick volumes",
            nodes.size() / 1024 / 1024,
            fragments.size() / 1024 / 1024,
            config.brick_buffer_res
        );

        Ok(Self {
            device,
            queue,
            factory,
            config: config.clone(),
            octree,
            bricks,
            light,
            cone,
            debug,
            voxelizer,
            octree_params,
            voxelize_params,
            svo_groups,
            voxelize_groups,
            voxelize_target,
            cone_octree,
            cone_volumes,
            debug_groups,
            light_group: None,
            nodes,
            fragments,
            records,
            seed_records,
            pack_counter,
            lit,
            opacity,
            irradiance,
            output,
            output_view,
            _voxelize_target_texture: voxelize_target_texture,
            encoder: None,
            last_submission: None,
            grid: None,
        })
    }

    fn create_output(factory: &ResourceFactory, size: UVec2) -> (Arc<wgpu::Texture>, wgpu::TextureView) {
        texture_2d(
            factory,
            "cone_trace_output",
            size,
            CONE_OUTPUT_FORMAT,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        )
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Factory for inputs that share the backend's leak audit.
    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    /// Index of the most recent submission, for frame pacing.
    pub fn last_submission(&self) -> Option<wgpu::SubmissionIndex> {
        self.last_submission.clone()
    }

    /// Cone tracing result: rgb = indirect light, a = ambient visibility.
    pub fn output_texture(&self) -> &wgpu::Texture {
        &self.output
    }

    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    /// Indirect records: slot 0 for fragments, slot `1 + L` for level `L`.
    pub fn records_buffer(&self) -> &wgpu::Buffer {
        &self.records
    }

    pub fn nodes_buffer(&self) -> &wgpu::Buffer {
        &self.nodes
    }

    pub fn fragments_buffer(&self) -> &wgpu::Buffer {
        &self.fragments
    }

    pub fn brick_texture(&self, target: BrickTarget) -> &wgpu::Texture {
        &self.bricks_of(target).texture
    }

    fn bricks_of(&self, target: BrickTarget) -> &BrickStorage {
        match target {
            BrickTarget::Opacity => &self.opacity,
            BrickTarget::Irradiance => &self.irradiance,
        }
    }

    fn level_offset(&self, level: u32) -> u32 {
        level * UNIFORM_SLOT_STRIDE as u32
    }

    fn leaf_level(&self) -> u32 {
        self.config.octree_height - 1
    }

    /// Read back the whole cone tracing output.
    pub fn read_output(&mut self) -> Result<Vec<[f32; 4]>> {
        self.submit()?;
        readback::read_rgba16f(&self.device, &self.queue, &self.output)
    }

    pub fn read_records(&mut self) -> Result<Vec<IndirectArgsRecord>> {
        self.submit()?;
        let bytes = readback::read_buffer(&self.device, &self.queue, &self.records, 0, self.records.size())?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// First `count` nodes of the arena.
    pub fn read_nodes(&mut self, count: u32) -> Result<Vec<OctreeNode>> {
        self.submit()?;
        let count = count.min(self.config.node_capacity()).max(1);
        let size = count as u64 * std::mem::size_of::<OctreeNode>() as u64;
        let bytes = readback::read_buffer(&self.device, &self.queue, &self.nodes, 0, size)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn read_fragments(&mut self) -> Result<Vec<VoxelFragment>> {
        let count = self.read_records()?[FRAGMENT_SLOT as usize].count();
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = count as u64 * std::mem::size_of::<VoxelFragment>() as u64;
        let bytes = readback::read_buffer(&self.device, &self.queue, &self.fragments, 0, size)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn read_bricks(&mut self, target: BrickTarget) -> Result<BrickVolume> {
        self.submit()?;
        let res = self.config.brick_buffer_res;
        let texels = readback::read_r32uint(&self.device, &self.queue, &self.bricks_of(target).texture)?;
        BrickVolume::from_texels(res, texels)
            .ok_or_else(|| Error::Readback(format!("{} readback does not fill {}^3 texels", target.label(), res)))
    }

    pub fn snapshot(&mut self, node_count: u32) -> Result<OctreeSnapshot> {
        let nodes = self.read_nodes(node_count)?;
        Ok(OctreeSnapshot::new(self.config.octree_height, node_count, &nodes))
    }
}

impl GiBackend for WgpuBackend {
    type Geometry = GpuMesh;
    type ShadowMap = GpuShadowMap;
    type Frame = GpuFrame;
    type DebugTarget = GpuDebugTarget;

    fn clear_octree(&mut self) -> Result<()> {
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        encoder.clear_buffer(&self.nodes, 0, None);
        encoder.clear_buffer(&self.pack_counter, 0, None);
        encoder.clear_buffer(&self.lit, 0, None);
        encoder.copy_buffer_to_buffer(&self.seed_records, 0, &self.records, 0, self.seed_records.size());
        self.light_group = None;
        Ok(())
    }

    fn voxelize(&mut self, geometry: &[GpuMesh], grid: &VoxelGrid) -> Result<()> {
        let height = self.config.octree_height;
        if grid.height() != height {
            return Err(Error::Voxel(format!(
                "grid height {} does not match octree height {}",
                grid.height(),
                height
            )));
        }
        if grid.resolution() != self.config.voxel_resolution() {
            return Err(Error::Voxel(format!(
                "grid resolution {} does not match the voxelization target {}",
                grid.resolution(),
                self.config.voxel_resolution()
            )));
        }

        for level in 0..height {
            self.octree_params
                .write(&self.queue, level, &OctreeParams::for_level(grid, &self.config, level));
        }
        let axis_offsets: [u32; 3] = std::array::from_fn(|axis| {
            let params = VoxelizeParams::for_axis(grid, self.config.fragment_capacity, axis);
            self.voxelize_params.write(&self.queue, axis as u32, &params)
        });

        let meshes: Vec<AxisVertexBuffers<'_>> = geometry.iter().map(GpuMesh::axis_buffers).collect();
        let vertices: u32 = geometry.iter().map(GpuMesh::vertex_count).sum();
        let finalize_offset = self.level_offset(0);

        let encoder = pending_encoder(&mut self.encoder, &self.device);
        encoder.clear_buffer(
            &self.records,
            indirect::slot_offset(FRAGMENT_SLOT),
            Some(std::mem::size_of::<IndirectArgsRecord>() as u64),
        );
        self.voxelizer
            .draw(encoder, &self.voxelize_target, &self.voxelize_groups, axis_offsets, &meshes);
        self.octree.finalize_fragments(encoder, &self.svo_groups, finalize_offset);

        self.grid = Some(*grid);
        log::debug!("Voxelizing {} meshes ({} vertices)", geometry.len(), vertices);
        Ok(())
    }

    fn flag_nodes(&mut self, level: u32) -> Result<()> {
        let offset = self.level_offset(level);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.octree.flag_nodes(encoder, &self.svo_groups, offset, &self.records);
        Ok(())
    }

    fn subdivide_nodes(&mut self, level: u32) -> Result<()> {
        let offset = self.level_offset(level);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.octree
            .subdivide_nodes(encoder, &self.svo_groups, offset, &self.records, level);
        Ok(())
    }

    fn connect_neighbors(&mut self, level: u32) -> Result<()> {
        let offset = self.level_offset(level);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.octree
            .connect_neighbors(encoder, &self.svo_groups, offset, &self.records, level);
        Ok(())
    }

    fn connect_nodes_to_voxels(&mut self) -> Result<()> {
        let offset = self.level_offset(self.leaf_level());
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.octree
            .connect_voxels(encoder, &self.svo_groups, offset, &self.records);
        Ok(())
    }

    fn read_node_pack_counter(&mut self) -> Result<u32> {
        self.submit()?;
        readback::read_u32(&self.device, &self.queue, &self.pack_counter, 0)
    }

    fn clear_brick_buffer(&mut self, target: BrickTarget) -> Result<()> {
        let offset = self.level_offset(0);
        let res = self.config.brick_buffer_res;
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        let storage = match target {
            BrickTarget::Opacity => &self.opacity,
            BrickTarget::Irradiance => &self.irradiance,
        };
        self.bricks
            .clear(encoder, &self.svo_groups, &storage.target, offset, res);
        Ok(())
    }

    fn construct_opacity(&mut self) -> Result<()> {
        let offset = self.level_offset(self.leaf_level());
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.bricks
            .construct_opacity(encoder, &self.svo_groups, &self.opacity.target, offset, &self.records);
        Ok(())
    }

    fn gather_from_low_level(&mut self, target: BrickTarget, level: u32) -> Result<()> {
        let offset = self.level_offset(level);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        let storage = match target {
            BrickTarget::Opacity => &self.opacity,
            BrickTarget::Irradiance => &self.irradiance,
        };
        self.bricks
            .gather(encoder, &self.svo_groups, &storage.target, offset, &self.records, level);
        Ok(())
    }

    fn average_along_axis(&mut self, target: BrickTarget, axis: Axis, level: u32) -> Result<()> {
        let offset = self.level_offset(level);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        let storage = match target {
            BrickTarget::Opacity => &self.opacity,
            BrickTarget::Irradiance => &self.irradiance,
        };
        self.bricks.average(
            encoder,
            &self.svo_groups,
            &storage.target,
            offset,
            &self.records,
            axis,
            level,
        );
        Ok(())
    }

    fn reset_node_light(&mut self) -> Result<()> {
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        encoder.clear_buffer(&self.lit, 0, None);
        Ok(())
    }

    fn inject_shadow_map(&mut self, shadow: &GpuShadowMap, light: &LightParams) -> Result<()> {
        if self.grid.is_none() {
            return Err(Error::Voxel("shadow map injected before voxelization".into()));
        }
        self.light.update_params(&self.queue, light);
        let light_group = self.light.create_light_bind_group(
            &self.device,
            &LightViews {
                irradiance: &self.irradiance.view,
                opacity: &self.opacity.view,
                shadow_depth: &shadow.view,
            },
        );

        let offset = self.level_offset(self.leaf_level());
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.light
            .inject(encoder, &self.svo_groups, &light_group, offset, shadow.size.to_array());
        self.light_group = Some(light_group);
        Ok(())
    }

    fn average_lit_node_values(&mut self, light: &LightParams) -> Result<()> {
        let Some(light_group) = self.light_group.as_ref() else {
            return Err(Error::Voxel("lit values averaged before shadow injection".into()));
        };
        self.light.update_params(&self.queue, light);

        let leaf = self.leaf_level();
        let offset = self.level_offset(leaf);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.light
            .average_lit(encoder, &self.svo_groups, light_group, offset, &self.records, leaf);
        Ok(())
    }

    fn trace_cones(&mut self, frame: &GpuFrame, params: &ConeTraceParams) -> Result<()> {
        let size = UVec2::from(params.output_size);
        if size.min_element() == 0 || frame.size.min_element() == 0 {
            return Err(Error::Voxel(format!("cannot trace into a {}x{} output", size.x, size.y)));
        }
        let current = self.output.size();
        if current.width != size.x || current.height != size.y {
            log::debug!("Resizing cone tracing output to {}x{}", size.x, size.y);
            let (output, view) = Self::create_output(&self.factory, size);
            self.output = output;
            self.output_view = view;
        }

        self.cone.update_params(&self.queue, params);
        let frame_group = self.cone.create_frame_bind_group(
            &self.device,
            &frame.normal_view,
            &frame.depth_view,
            &self.output_view,
        );
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.cone
            .dispatch(encoder, &self.cone_octree, &self.cone_volumes, &frame_group, size.to_array());
        Ok(())
    }

    fn draw_debug(&mut self, target: &mut GpuDebugTarget, params: &DebugDrawParams) -> Result<()> {
        self.debug.update_params(&self.queue, params);
        let encoder = pending_encoder(&mut self.encoder, &self.device);
        self.debug.draw(
            encoder,
            &target.color_view,
            &target.depth_view,
            &self.debug_groups,
            &self.records,
        );
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let index = self.queue.submit(std::iter::once(encoder.finish()));
            self.last_submission = Some(index);
        }
        Ok(())
    }

    fn registry(&self) -> Option<Arc<ResourceRegistry>> {
        Some(self.factory.registry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_texels() {
        let texels = normal_texels(&[Vec3::new(0.0, 1.0, -0.5)]);
        assert_eq!(texels.len(), 4);
        let decoded: Vec<f32> = texels.iter().map(|&t| half::f16::from_bits(t).to_f32()).collect();
        assert_eq!(decoded, vec![0.0, 1.0, -0.5, 0.0]);
    }

    #[test]
    fn test_level_slots_fit_dynamic_alignment() {
        // Dynamic uniform offsets must be multiples of 256 on every backend.
        assert_eq!(UNIFORM_SLOT_STRIDE % 256, 0);
        assert!(std::mem::size_of::<OctreeParams>() as u64 <= UNIFORM_SLOT_STRIDE);
        assert!(std::mem::size_of::<VoxelizeParams>() as u64 <= UNIFORM_SLOT_STRIDE);
    }
}
