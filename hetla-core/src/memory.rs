//! Backend-tagged storage shared by vectors and matrices.
//!
//! A [`Storage`] owns the authoritative copy of an array in exactly one
//! memory space. Kernels never look at the tag per element: callers resolve a
//! storage once into a [`View`] / [`ViewMut`] and dispatch on that.

use crate::backend::BackendTag;
use crate::context::GpuContext;
use crate::contract::device_ok;
use crate::device::{AcceleratorDevice, DeviceKind};
use crate::scalar::Scalar;
use std::fmt;
use std::mem;
use std::sync::Arc;

pub(crate) const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Where an object lives.
#[derive(Debug, Clone)]
pub enum Placement {
    Host,
    Accelerator(Arc<AcceleratorDevice>),
}

impl Placement {
    pub fn tag(&self) -> BackendTag {
        match self {
            Placement::Host => BackendTag::Host,
            Placement::Accelerator(_) => BackendTag::Accelerator,
        }
    }

    /// Same memory space: both host, or the same accelerator device.
    pub fn same_as(&self, other: &Placement) -> bool {
        match (self, other) {
            (Placement::Host, Placement::Host) => true,
            (Placement::Accelerator(a), Placement::Accelerator(b)) => a.id() == b.id(),
            _ => false,
        }
    }

    pub fn device(&self) -> Option<&Arc<AcceleratorDevice>> {
        match self {
            Placement::Host => None,
            Placement::Accelerator(device) => Some(device),
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Host => write!(f, "host"),
            Placement::Accelerator(device) => write!(f, "accelerator #{}", device.id()),
        }
    }
}

#[derive(Debug)]
pub(crate) enum DeviceMemory<T> {
    Empty,
    Simulated(Vec<T>),
    Gpu { buffer: wgpu::Buffer, len: usize },
}

#[derive(Debug)]
pub(crate) enum Storage<T> {
    Host(Vec<T>),
    Device {
        device: Arc<AcceleratorDevice>,
        memory: DeviceMemory<T>,
    },
}

/// Read access to a storage, resolved once per operation.
pub(crate) enum View<'a, T> {
    Slice(&'a [T]),
    Gpu(&'a GpuContext, &'a wgpu::Buffer),
}

pub(crate) enum ViewMut<'a, T> {
    Slice(&'a mut [T]),
    Gpu(&'a GpuContext, &'a wgpu::Buffer),
}

fn byte_len<T>(len: usize) -> u64 {
    (len * mem::size_of::<T>()) as u64
}

impl<T: Scalar> Storage<T> {
    pub(crate) fn empty(placement: &Placement) -> Self {
        match placement {
            Placement::Host => Storage::Host(Vec::new()),
            Placement::Accelerator(device) => Storage::Device {
                device: Arc::clone(device),
                memory: DeviceMemory::Empty,
            },
        }
    }

    /// Zero-filled storage of `len` elements.
    pub(crate) fn zeroed(placement: &Placement, len: usize, label: &str) -> Self {
        let device = match placement {
            Placement::Host => return Storage::Host(vec![T::zero(); len]),
            Placement::Accelerator(device) => device,
        };
        let memory = if len == 0 {
            DeviceMemory::Empty
        } else {
            match &device.kind {
                DeviceKind::Simulated(_) => DeviceMemory::Simulated(vec![T::zero(); len]),
                // wgpu zero-initialises new buffers.
                DeviceKind::Wgpu(ctx) => DeviceMemory::Gpu {
                    buffer: ctx.create_empty_buffer(label, byte_len::<T>(len), BUFFER_USAGE),
                    len,
                },
            }
        };
        Storage::Device {
            device: Arc::clone(device),
            memory,
        }
    }

    /// Takes ownership of host data and places it on `placement`.
    pub(crate) fn from_vec(placement: &Placement, data: Vec<T>, label: &str) -> Self {
        let device = match placement {
            Placement::Host => return Storage::Host(data),
            Placement::Accelerator(device) => device,
        };
        let len = data.len();
        let memory = if len == 0 {
            DeviceMemory::Empty
        } else {
            match &device.kind {
                DeviceKind::Simulated(_) => {
                    device.record_upload(byte_len::<T>(len));
                    DeviceMemory::Simulated(data)
                }
                DeviceKind::Wgpu(ctx) => DeviceMemory::Gpu {
                    buffer: ctx.create_gpu_buffer_with_data(
                        label,
                        bytemuck::cast_slice(&data),
                        BUFFER_USAGE,
                    ),
                    len,
                },
            }
        };
        Storage::Device {
            device: Arc::clone(device),
            memory,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Storage::Host(data) => data.len(),
            Storage::Device { memory, .. } => match memory {
                DeviceMemory::Empty => 0,
                DeviceMemory::Simulated(data) => data.len(),
                DeviceMemory::Gpu { len, .. } => *len,
            },
        }
    }

    pub(crate) fn placement(&self) -> Placement {
        match self {
            Storage::Host(_) => Placement::Host,
            Storage::Device { device, .. } => Placement::Accelerator(Arc::clone(device)),
        }
    }

    pub(crate) fn is_host(&self) -> bool {
        matches!(self, Storage::Host(_))
    }

    pub(crate) fn view(&self) -> View<'_, T> {
        match self {
            Storage::Host(data) => View::Slice(data),
            Storage::Device { device, memory } => match memory {
                DeviceMemory::Empty => View::Slice(&[]),
                DeviceMemory::Simulated(data) => View::Slice(data),
                DeviceMemory::Gpu { buffer, .. } => match device.gpu() {
                    Some(ctx) => View::Gpu(ctx, buffer),
                    None => crate::contract_violation!(
                        DeviceFault,
                        "GPU buffer owned by a non-GPU device"
                    ),
                },
            },
        }
    }

    pub(crate) fn view_mut(&mut self) -> ViewMut<'_, T> {
        match self {
            Storage::Host(data) => ViewMut::Slice(data),
            Storage::Device { device, memory } => match memory {
                DeviceMemory::Empty => ViewMut::Slice(&mut []),
                DeviceMemory::Simulated(data) => ViewMut::Slice(data),
                DeviceMemory::Gpu { buffer, .. } => match device.gpu() {
                    Some(ctx) => ViewMut::Gpu(ctx, buffer),
                    None => crate::contract_violation!(
                        DeviceFault,
                        "GPU buffer owned by a non-GPU device"
                    ),
                },
            },
        }
    }

    /// Host copy of the whole array.
    pub(crate) fn to_vec(&self) -> Vec<T> {
        self.read_range(0, self.len())
    }

    /// Host copy of `count` elements starting at `offset`.
    pub(crate) fn read_range(&self, offset: usize, count: usize) -> Vec<T> {
        match self {
            Storage::Host(data) => data[offset..offset + count].to_vec(),
            Storage::Device { device, memory } => match memory {
                DeviceMemory::Empty => Vec::new(),
                DeviceMemory::Simulated(data) => {
                    device.record_download(byte_len::<T>(count));
                    data[offset..offset + count].to_vec()
                }
                DeviceMemory::Gpu { buffer, .. } => match device.gpu() {
                    Some(ctx) => device_ok(pollster::block_on(
                        ctx.read_buffer_to_cpu::<T>(buffer, offset, count),
                    )),
                    None => Vec::new(),
                },
            },
        }
    }

    /// Overwrites `data.len()` elements starting at `offset` with host data.
    pub(crate) fn write_range(&mut self, offset: usize, data: &[T]) {
        match self {
            Storage::Host(dst) => dst[offset..offset + data.len()].copy_from_slice(data),
            Storage::Device { device, memory } => match memory {
                DeviceMemory::Empty => {}
                DeviceMemory::Simulated(dst) => {
                    device.record_upload(byte_len::<T>(data.len()));
                    dst[offset..offset + data.len()].copy_from_slice(data);
                }
                DeviceMemory::Gpu { buffer, .. } => {
                    if let Some(ctx) = device.gpu() {
                        device_ok(ctx.write_buffer(buffer, offset, data));
                    }
                }
            },
        }
    }

    /// Duplicate with the same placement. GPU buffers are copied on the device.
    pub(crate) fn duplicate(&self, label: &str) -> Self {
        match self {
            Storage::Host(data) => Storage::Host(data.clone()),
            Storage::Device { device, memory } => {
                let memory = match memory {
                    DeviceMemory::Empty => DeviceMemory::Empty,
                    DeviceMemory::Simulated(data) => DeviceMemory::Simulated(data.clone()),
                    DeviceMemory::Gpu { buffer, len } => match device.gpu() {
                        Some(ctx) => {
                            let copy =
                                ctx.create_empty_buffer(label, byte_len::<T>(*len), BUFFER_USAGE);
                            ctx.copy_buffer(buffer, 0, &copy, 0, byte_len::<T>(*len));
                            DeviceMemory::Gpu {
                                buffer: copy,
                                len: *len,
                            }
                        }
                        None => DeviceMemory::Empty,
                    },
                };
                Storage::Device {
                    device: Arc::clone(device),
                    memory,
                }
            }
        }
    }

    /// Copies `count` elements between two storages on the same placement.
    pub(crate) fn copy_within_placement(
        &mut self,
        dst_offset: usize,
        src: &Storage<T>,
        src_offset: usize,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        match (self.view_mut(), src.view()) {
            (ViewMut::Slice(dst), View::Slice(src)) => dst[dst_offset..dst_offset + count]
                .copy_from_slice(&src[src_offset..src_offset + count]),
            (ViewMut::Gpu(ctx, dst), View::Gpu(_, src)) => ctx.copy_buffer(
                src,
                byte_len::<T>(src_offset),
                dst,
                byte_len::<T>(dst_offset),
                byte_len::<T>(count),
            ),
            _ => crate::contract_violation!(
                Precondition,
                "copy between storages of different memory spaces"
            ),
        }
    }
}
