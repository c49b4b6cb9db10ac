use crate::backend::KernelTuning;
use crate::error::CoreError;
use bytemuck::Pod;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use wgpu::{util::DeviceExt, PollType};

/// Wrapper for the WGPU device and queue, including transfer counters and the
/// compiled pipeline cache. Internal to the crate.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) adapter_info: wgpu::AdapterInfo,
    pub(crate) supports_f64: bool,
    pub(crate) tuning: KernelTuning,
    /// Tracks bytes transferred from CPU to GPU via instrumented methods.
    bytes_to_gpu: AtomicU64,
    /// Tracks bytes transferred from GPU to CPU via instrumented methods.
    bytes_from_gpu: AtomicU64,
    pipelines: Mutex<HashMap<String, wgpu::ComputePipeline>>,
}

/// A device-to-host copy that has been submitted but not yet mapped.
#[derive(Debug)]
pub(crate) struct PendingRead {
    staging: wgpu::Buffer,
    receiver: futures::channel::oneshot::Receiver<Result<(), wgpu::BufferAsyncError>>,
    size_bytes: u64,
}

impl GpuContext {
    /// Initializes the WGPU context asynchronously.
    pub(crate) async fn new(tuning: KernelTuning) -> Result<Self, CoreError> {
        log::info!("Initializing native WGPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY, // Vulkan, Metal, DX12
            ..Default::default()
        });

        log::debug!("Requesting native adapter");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| {
                CoreError::AcceleratorInit("No suitable native adapter found".to_string())
            })?;

        let adapter_info = adapter.get_info();
        log::info!("Selected Native Adapter: {:?}", adapter_info);
        log::debug!("Adapter Features: {:?}", adapter.features());

        let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
        // CSR SpMV binds six storage buffers.
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(8);
        limits.max_compute_workgroup_size_x = limits
            .max_compute_workgroup_size_x
            .max(tuning.block_size);
        limits.max_compute_invocations_per_workgroup = limits
            .max_compute_invocations_per_workgroup
            .max(tuning.block_size);
        log::debug!("Adjusted limits: {:?}", limits);

        // Only ask for f64 when the adapter has it; f64 kernels are refused otherwise.
        let f64_feature = adapter.features() & wgpu::Features::SHADER_F64;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hetla device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: f64_feature,
                required_limits: limits,
            })
            .await
            .map_err(|e| CoreError::AcceleratorInit(format!("Failed to request device: {}", e)))?;

        let supports_f64 = device.features().contains(wgpu::Features::SHADER_F64);
        if supports_f64 {
            log::info!("SHADER_F64 feature enabled, f64 kernels available.");
        } else {
            log::warn!("Device lacks SHADER_F64; f64 arithmetic on this accelerator is unsupported");
        }

        Ok(Self {
            device,
            queue,
            adapter_info,
            supports_f64,
            tuning,
            bytes_to_gpu: AtomicU64::new(0),
            bytes_from_gpu: AtomicU64::new(0),
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    /// Helper to create a GPU buffer with initial data and track the transfer size.
    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let byte_len = contents.len() as u64;
        log::debug!("Creating GPU buffer '{}' with {} bytes", label, byte_len);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.count_upload(byte_len);
        buffer
    }

    /// Helper to create a zero-initialised GPU buffer.
    /// Does not count towards `bytes_to_gpu` as no data is transferred.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating empty GPU buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Writes `data` into `buffer` starting at element `offset`.
    pub(crate) fn write_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: usize,
        data: &[T],
    ) -> Result<(), CoreError> {
        let element_size = std::mem::size_of::<T>();
        let byte_len = (data.len() * element_size) as u64;
        if byte_len == 0 {
            log::debug!("Skipping write for 0 bytes");
            return Ok(());
        }
        let byte_offset = (offset * element_size) as u64;
        if buffer.size() < byte_offset + byte_len {
            return Err(CoreError::Internal(format!(
                "Target buffer size ({}) is smaller than write end ({})",
                buffer.size(),
                byte_offset + byte_len
            )));
        }
        if !buffer.usage().contains(wgpu::BufferUsages::COPY_DST) {
            return Err(CoreError::Internal(
                "Target buffer must have COPY_DST usage".to_string(),
            ));
        }

        log::debug!("Writing {} bytes to buffer at offset {}", byte_len, byte_offset);
        self.queue
            .write_buffer(buffer, byte_offset, bytemuck::cast_slice(data));
        self.count_upload(byte_len);
        Ok(())
    }

    /// Encodes and submits a buffer-to-buffer copy. Offsets and length are in bytes.
    pub(crate) fn copy_buffer(
        &self,
        source: &wgpu::Buffer,
        source_offset: u64,
        destination: &wgpu::Buffer,
        destination_offset: u64,
        size_bytes: u64,
    ) {
        if size_bytes == 0 {
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hetla copy encoder"),
            });
        encoder.copy_buffer_to_buffer(
            source,
            source_offset,
            destination,
            destination_offset,
            size_bytes,
        );
        self.queue.submit(Some(encoder.finish()));
    }

    /// Submits a copy of `element_count` elements (from element `offset`) into a
    /// staging buffer and requests the mapping. Finish with [`GpuContext::finish_read`].
    pub(crate) fn begin_read<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: usize,
        element_count: usize,
    ) -> Result<PendingRead, CoreError> {
        let element_size = std::mem::size_of::<T>();
        let size_bytes = (element_count * element_size) as u64;
        let byte_offset = (offset * element_size) as u64;
        if buffer.size() < byte_offset + size_bytes {
            return Err(CoreError::Internal(format!(
                "GPU buffer size ({}) is smaller than requested range end ({})",
                buffer.size(),
                byte_offset + size_bytes
            )));
        }

        log::debug!(
            "Creating staging buffer for readback ({} bytes)",
            size_bytes
        );
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer_for_readback"),
            size: size_bytes.max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.copy_buffer(buffer, byte_offset, &staging, 0, size_bytes);

        let (sender, receiver) = futures::channel::oneshot::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if let Err(e) = sender.send(result) {
                    log::error!("Failed to send map result back: {:?}", e);
                }
            });

        self.bytes_from_gpu.fetch_add(size_bytes, Ordering::Relaxed);
        log::trace!(
            "bytes_from_gpu incremented by {}, now: {}",
            size_bytes,
            self.bytes_from_gpu.load(Ordering::Relaxed)
        );

        Ok(PendingRead {
            staging,
            receiver,
            size_bytes,
        })
    }

    /// Waits for a pending readback and copies the mapped bytes out.
    pub(crate) async fn finish_read<T: Pod>(
        &self,
        pending: PendingRead,
    ) -> Result<Vec<T>, CoreError> {
        let PendingRead {
            staging,
            receiver,
            size_bytes,
        } = pending;

        log::debug!("Polling device to wait for buffer mapping");
        self.device
            .poll(PollType::Wait)
            .map_err(|e| CoreError::WgpuError(format!("Device poll failed: {}", e)))?;

        match receiver.await {
            Ok(Ok(())) => {
                let result = {
                    let data = staging.slice(..).get_mapped_range();
                    let bytes = &data[..size_bytes as usize];
                    bytemuck::cast_slice::<u8, T>(bytes).to_vec()
                };
                staging.unmap();
                log::debug!(
                    "Buffer readback complete and unmapped ({} bytes)",
                    size_bytes
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(CoreError::WgpuError(format!(
                "Buffer mapping failed: {}",
                e
            ))),
            Err(_) => Err(CoreError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    /// Reads `element_count` elements starting at element `offset` back to the CPU.
    pub(crate) async fn read_buffer_to_cpu<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: usize,
        element_count: usize,
    ) -> Result<Vec<T>, CoreError> {
        if element_count == 0 {
            log::debug!("Skipping readback for 0 bytes");
            return Ok(Vec::new());
        }
        let pending = self.begin_read::<T>(buffer, offset, element_count)?;
        self.finish_read(pending).await
    }

    /// Blocks until all submitted work has completed.
    pub(crate) fn wait_idle(&self) -> Result<(), CoreError> {
        self.device
            .poll(PollType::Wait)
            .map(|_| ())
            .map_err(|e| CoreError::WgpuError(format!("Device poll failed: {}", e)))
    }

    /// Returns a cached compute pipeline, compiling it on first use.
    pub(crate) fn pipeline(
        &self,
        key: &str,
        source: impl FnOnce() -> String,
    ) -> Result<wgpu::ComputePipeline, CoreError> {
        let mut cache = self
            .pipelines
            .lock()
            .map_err(|_| CoreError::Internal("Pipeline cache poisoned".to_string()))?;
        if let Some(pipeline) = cache.get(key) {
            return Ok(pipeline.clone());
        }
        log::debug!("Compiling compute pipeline '{}'", key);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(key),
                source: wgpu::ShaderSource::Wgsl(source().into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(key),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                cache: None,
                compilation_options: Default::default(),
            });
        cache.insert(key.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    fn count_upload(&self, byte_len: u64) {
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        log::trace!(
            "bytes_to_gpu incremented by {}, now: {}",
            byte_len,
            self.bytes_to_gpu.load(Ordering::Relaxed)
        );
    }

    /// Returns the current transfer statistics.
    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    /// Resets the transfer statistics counters to zero.
    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::info!("GPU transfer counters reset.");
    }
}
