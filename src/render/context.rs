//! Headless GPU context management using wgpu

use crate::core::config::VctConfig;
use crate::core::error::Error;
use crate::voxel::{OctreeNode, VoxelFragment};

/// Format of both brick volumes.
pub const BRICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// GPU context without a surface. Voxel cone tracing only renders into
/// its own textures.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Pick an adapter able to run every pass at the sizes `config` asks
    /// for and open a device on it.
    pub async fn new(config: &VctConfig) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        check_capabilities(&adapter, config)?;

        let adapter_limits = adapter.limits();
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("voxgi_device"),
            required_features: adapter.features() & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
            required_limits: wgpu::Limits {
                max_texture_dimension_3d: adapter_limits.max_texture_dimension_3d,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                ..Default::default()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);
        log::info!(
            "GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB, max_texture_3d={}",
            adapter_limits.max_buffer_size / 1024 / 1024,
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024,
            adapter_limits.max_texture_dimension_3d
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

/// Reject adapters that cannot hold the configured resources or run the
/// fragment-stage and indirect passes.
pub fn check_capabilities(adapter: &wgpu::Adapter, config: &VctConfig) -> Result<(), Error> {
    let downlevel = adapter.get_downlevel_capabilities();
    let required = wgpu::DownlevelFlags::COMPUTE_SHADERS
        | wgpu::DownlevelFlags::INDIRECT_EXECUTION
        | wgpu::DownlevelFlags::VERTEX_STORAGE
        | wgpu::DownlevelFlags::FRAGMENT_WRITABLE_STORAGE;
    if !downlevel.flags.contains(required) {
        return Err(Error::Capability(format!(
            "adapter lacks {:?}",
            required - downlevel.flags
        )));
    }

    let brick_features = adapter.get_texture_format_features(BRICK_FORMAT);
    if !brick_features
        .flags
        .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
    {
        return Err(Error::Capability(format!(
            "{:?} storage textures are not read-write on this adapter",
            BRICK_FORMAT
        )));
    }

    let limits = adapter.limits();
    if limits.max_texture_dimension_3d < config.brick_buffer_res {
        return Err(Error::Capability(format!(
            "brick volume of {}^3 exceeds the 3D texture limit {}",
            config.brick_buffer_res, limits.max_texture_dimension_3d
        )));
    }

    let node_bytes = config.node_capacity() as u64 * std::mem::size_of::<OctreeNode>() as u64;
    let fragment_bytes = config.fragment_capacity as u64 * std::mem::size_of::<VoxelFragment>() as u64;
    let largest = node_bytes.max(fragment_bytes);
    if u64::from(limits.max_storage_buffer_binding_size) < largest
        || u64::from(limits.max_buffer_size) < largest
    {
        return Err(Error::Capability(format!(
            "a {} byte storage buffer exceeds the adapter's binding limit {}",
            largest, limits.max_storage_buffer_binding_size
        )));
    }
    Ok(())
}
