use crate::backend::KernelTuning;
use crate::context::GpuContext;
use crate::error::CoreError;
use crate::scalar::ScalarKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

/// Byte counters for host/device transfers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_to_device: u64,
    pub bytes_from_device: u64,
}

/// A memory space distinct from the host's, emulated in host RAM.
#[derive(Debug, Default)]
pub(crate) struct SimulatedMemory {
    bytes_to_device: AtomicU64,
    bytes_from_device: AtomicU64,
}

#[derive(Debug)]
pub(crate) enum DeviceKind {
    Wgpu(GpuContext),
    Simulated(SimulatedMemory),
}

/// An accelerator device. Vectors and matrices on it share it through `Arc`.
#[derive(Debug)]
pub struct AcceleratorDevice {
    id: usize,
    pub(crate) kind: DeviceKind,
}

impl AcceleratorDevice {
    pub(crate) async fn wgpu(tuning: KernelTuning) -> Result<Self, CoreError> {
        let context = GpuContext::new(tuning).await?;
        let device = Self::with_kind(DeviceKind::Wgpu(context));
        log::info!("Accelerator {} created: {}", device.id, device.name());
        Ok(device)
    }

    pub(crate) fn simulated() -> Self {
        let device = Self::with_kind(DeviceKind::Simulated(SimulatedMemory::default()));
        log::info!("Accelerator {} created: {}", device.id, device.name());
        device
    }

    fn with_kind(kind: DeviceKind) -> Self {
        Self {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Process-unique identifier; operands must agree on it.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> String {
        match &self.kind {
            DeviceKind::Wgpu(ctx) => format!(
                "wgpu {} ({:?})",
                ctx.adapter_info.name, ctx.adapter_info.backend
            ),
            DeviceKind::Simulated(_) => "simulated".to_string(),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.kind, DeviceKind::Simulated(_))
    }

    /// Whether arithmetic kernels exist for `kind` on this device.
    pub fn supports_arithmetic(&self, kind: ScalarKind) -> bool {
        match (&self.kind, kind) {
            (_, ScalarKind::I32) => false,
            (DeviceKind::Wgpu(ctx), ScalarKind::F64) => ctx.supports_f64,
            _ => true,
        }
    }

    /// Whether data-movement kernels (fill, permute, gather) exist for `kind`.
    pub fn supports_kernels(&self, kind: ScalarKind) -> bool {
        match (&self.kind, kind) {
            (DeviceKind::Wgpu(ctx), ScalarKind::F64) => ctx.supports_f64,
            _ => true,
        }
    }

    pub fn transfer_stats(&self) -> TransferStats {
        match &self.kind {
            DeviceKind::Wgpu(ctx) => {
                let (bytes_to_device, bytes_from_device) = ctx.get_transfer_stats();
                TransferStats {
                    bytes_to_device,
                    bytes_from_device,
                }
            }
            DeviceKind::Simulated(mem) => TransferStats {
                bytes_to_device: mem.bytes_to_device.load(Ordering::Relaxed),
                bytes_from_device: mem.bytes_from_device.load(Ordering::Relaxed),
            },
        }
    }

    pub fn reset_transfer_stats(&self) {
        match &self.kind {
            DeviceKind::Wgpu(ctx) => ctx.reset_transfer_stats(),
            DeviceKind::Simulated(mem) => {
                mem.bytes_to_device.store(0, Ordering::Relaxed);
                mem.bytes_from_device.store(0, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn gpu(&self) -> Option<&GpuContext> {
        match &self.kind {
            DeviceKind::Wgpu(ctx) => Some(ctx),
            DeviceKind::Simulated(_) => None,
        }
    }

    pub(crate) fn record_upload(&self, bytes: u64) {
        if let DeviceKind::Simulated(mem) = &self.kind {
            mem.bytes_to_device.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_download(&self, bytes: u64) {
        if let DeviceKind::Simulated(mem) = &self.kind {
            mem.bytes_from_device.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Blocks until queued device work has completed.
    pub fn synchronize(&self) {
        if let DeviceKind::Wgpu(ctx) = &self.kind {
            if let Err(e) = ctx.wait_idle() {
                crate::contract_violation!(DeviceFault, "{}", e);
            }
        }
    }
}
