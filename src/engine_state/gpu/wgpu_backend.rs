//! # wgpu Backend
//!
//! Maps the [`GpuBackend`] seam onto `wgpu`:
//!
//! * buffers are `Arc<wgpu::Buffer>` so regions and retired lists can share them
//! * uploads use `Queue::write_buffer`, which lands before the next submission
//! * transfers record into a `CommandEncoder`
//! * fences are flags set from `Queue::on_submitted_work_done`
//! * drawing goes through `RenderPass::multi_draw_indexed_indirect`
//!
//! Drawing needs `MULTI_DRAW_INDIRECT` and `INDIRECT_FIRST_INSTANCE`; the
//! latter lets each draw pick its render-info record through `first_instance`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::{Device, Features, Queue};

use super::backend::{BufferRole, CommandRecorder, Fence, GpuBackend, RenderRecorder};

/// A `wgpu` device and queue.
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
}

/// Signaled from the queue's completion callback.
#[derive(Debug, Clone)]
pub struct WgpuFence(Arc<AtomicBool>);

impl Fence for WgpuFence {
    fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl WgpuBackend {
    /// Wraps an existing device and queue.
    pub fn new(device: Device, queue: Queue) -> Self {
        Self { device, queue }
    }

    /// Features the draw path relies on.
    pub fn required_features() -> Features {
        Features::MULTI_DRAW_INDIRECT | Features::INDIRECT_FIRST_INSTANCE
    }

    /// Opens a device without a surface, blocking on adapter and device requests.
    ///
    /// # Returns
    /// `None` when no adapter exposes [`Self::required_features`]
    pub fn request_headless() -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::empty(),
            backend_options: wgpu::BackendOptions::from_env_or_default(),
        });

        pollster::block_on(async move {
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;

            let required_features = Self::required_features();
            if !adapter.features().contains(required_features) {
                log::warn!(
                    "Adapter {:?} lacks {:?}",
                    adapter.get_info().name,
                    required_features - adapter.features()
                );
                return None;
            }

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    label: Some("voxel streaming device"),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                    trace: wgpu::Trace::Off,
                })
                .await
                .ok()?;

            log::info!("Opened headless device on {}", adapter.get_info().name);
            Some(Self::new(device, queue))
        })
    }

    /// The wrapped device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The wrapped queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}

fn usage_for(role: BufferRole) -> wgpu::BufferUsages {
    let copy = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    match role {
        BufferRole::Index => wgpu::BufferUsages::INDEX | copy,
        BufferRole::Vertex | BufferRole::RenderInfo => wgpu::BufferUsages::VERTEX | copy,
        BufferRole::Indirect => wgpu::BufferUsages::INDIRECT | copy,
        BufferRole::Staging => copy,
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = Arc<wgpu::Buffer>;
    type Recorder = wgpu::CommandEncoder;
    type Fence = WgpuFence;

    fn create_buffer(&self, label: &str, size: u64, role: BufferRole) -> Self::Buffer {
        Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage_for(role),
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_recorder(&self, label: &str) -> Self::Recorder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn submit(&self, recorder: Self::Recorder) -> Self::Fence {
        self.queue.submit(std::iter::once(recorder.finish()));
        let signaled = Arc::new(AtomicBool::new(false));
        let callback_flag = signaled.clone();
        self.queue.on_submitted_work_done(move || {
            callback_flag.store(true, Ordering::Release);
        });
        WgpuFence(signaled)
    }

    fn poll(&self) {
        if let Err(error) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed: {error}");
        }
    }
}

impl CommandRecorder<Arc<wgpu::Buffer>> for wgpu::CommandEncoder {
    fn copy_buffer_to_buffer(
        &mut self,
        source: &Arc<wgpu::Buffer>,
        source_offset: u64,
        destination: &Arc<wgpu::Buffer>,
        destination_offset: u64,
        size: u64,
    ) {
        wgpu::CommandEncoder::copy_buffer_to_buffer(
            self,
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        );
    }
}

impl RenderRecorder<Arc<wgpu::Buffer>> for wgpu::RenderPass<'_> {
    fn set_geometry_buffers(
        &mut self,
        index: &Arc<wgpu::Buffer>,
        vertex: &Arc<wgpu::Buffer>,
        render_info: &Arc<wgpu::Buffer>,
    ) {
        self.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
        self.set_vertex_buffer(0, vertex.slice(..));
        self.set_vertex_buffer(1, render_info.slice(..));
    }

    fn multi_draw_indexed_indirect(
        &mut self,
        indirect: &Arc<wgpu::Buffer>,
        indirect_offset: u64,
        count: u32,
    ) {
        wgpu::RenderPass::multi_draw_indexed_indirect(self, indirect, indirect_offset, count);
    }
}
