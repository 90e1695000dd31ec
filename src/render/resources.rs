//! Shared GPU resource handles with a leak audit
//!
//! Every buffer and texture the backend creates goes through
//! [`ResourceFactory`], which hands out `Arc` handles and records a weak
//! reference in a [`ResourceRegistry`]. After teardown the registry lists
//! whatever is still alive.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use wgpu::util::DeviceExt;

struct Entry {
    label: String,
    handle: Weak<dyn Any + Send + Sync>,
}

/// Weak list of labeled resources. Holds nothing alive by itself.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` under `label`.
    pub fn track<T: Any + Send + Sync>(&self, label: &str, handle: &Arc<T>) {
        let erased: Arc<dyn Any + Send + Sync> = handle.clone();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|e| e.handle.strong_count() > 0);
        entries.push(Entry {
            label: label.to_string(),
            handle: Arc::downgrade(&erased),
        });
    }

    /// Labels of tracked resources that still have an owner.
    pub fn live_labels(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| e.handle.strong_count() > 0)
            .map(|e| e.label.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live_labels().len()
    }
}

/// Creates tracked buffers and textures on one device.
pub struct ResourceFactory {
    device: wgpu::Device,
    registry: Arc<ResourceRegistry>,
}

impl ResourceFactory {
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            registry: Arc::new(ResourceRegistry::new()),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }

    pub fn buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> Arc<wgpu::Buffer> {
        let buffer = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }));
        self.registry.track(label, &buffer);
        buffer
    }

    pub fn buffer_init(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> Arc<wgpu::Buffer> {
        let buffer = Arc::new(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        }));
        self.registry.track(label, &buffer);
        buffer
    }

    pub fn texture(&self, desc: &wgpu::TextureDescriptor<'_>) -> Arc<wgpu::Texture> {
        let texture = Arc::new(self.device.create_texture(desc));
        self.registry.track(desc.label.unwrap_or("texture"), &texture);
        texture
    }
}
