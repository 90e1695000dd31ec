//! Blocking GPU-to-host copies
//!
//! Only used outside the steady-state frame: the node counter after a
//! build, and inspection of buffers and textures by tools and tests.

use crate::core::error::Error;
use crate::core::types::Result;

fn map_staging(device: &wgpu::Device, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| Error::Readback(format!("Device poll failed: {}", e)))?;
    rx.recv()
        .map_err(|e| Error::Readback(format!("Map callback dropped: {}", e)))?
        .map_err(|e| Error::Readback(format!("Buffer map failed: {}", e)))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Copy `size` bytes at `offset` out of `source`.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));
    map_staging(device, &staging)
}

/// Read one `u32` at `offset`.
pub fn read_u32(device: &wgpu::Device, queue: &wgpu::Queue, source: &wgpu::Buffer, offset: u64) -> Result<u32> {
    let bytes = read_buffer(device, queue, source, offset, 4)?;
    let word: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Readback("short counter read".into()))?;
    Ok(u32::from_le_bytes(word))
}

/// Copy a whole 2D or 3D texture, rows tightly packed.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_texel: u32,
) -> Result<Vec<u8>> {
    let size = texture.size();
    let layers = size.depth_or_array_layers;
    let unpadded = size.width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;
    let total = padded as u64 * size.height as u64 * layers as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture_readback_staging"),
        size: total,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texture_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(size.height),
            },
        },
        size,
    );
    queue.submit(std::iter::once(encoder.finish()));

    let padded_bytes = map_staging(device, &staging)?;
    let mut bytes = Vec::with_capacity((unpadded * size.height * layers) as usize);
    for row in padded_bytes.chunks_exact(padded as usize) {
        bytes.extend_from_slice(&row[..unpadded as usize]);
    }
    Ok(bytes)
}

/// Read an `Rgba16Float` texture as `f32` quadruples.
pub fn read_rgba16f(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<Vec<[f32; 4]>> {
    let bytes = read_texture(device, queue, texture, 8)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|px| {
            let channel = |i: usize| half::f16::from_bits(u16::from_le_bytes([px[i * 2], px[i * 2 + 1]])).to_f32();
            [channel(0), channel(1), channel(2), channel(3)]
        })
        .collect())
}

/// Read an `R32Uint` texture.
pub fn read_r32uint(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<Vec<u32>> {
    let bytes = read_texture(device, queue, texture, 4)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}
