//! Moving vectors and matrices between memory spaces.
//!
//! A move first produces every new storage of the object and only then
//! replaces the old ones, so data and its metadata (index subsets, CSR
//! structure) always change placement together. Asynchronous moves park the
//! new storages in an [`InFlight`] until `sync` swaps them in.

use crate::context::PendingRead;
use crate::contract::device_ok;
use crate::device::AcceleratorDevice;
use crate::memory::{DeviceMemory, Placement, Storage};
use crate::scalar::Scalar;
use std::sync::Arc;

/// Placement control shared by [`crate::Vector`] and [`crate::LocalMatrix`].
pub trait Migrate {
    fn placement(&self) -> Placement;

    /// Moves to the descriptor's accelerator. Without one this logs a
    /// warning and stays on the host.
    fn move_to_accelerator(&mut self);

    fn move_to_host(&mut self);

    /// Starts the move; the object is unusable until [`Migrate::sync`].
    fn move_to_accelerator_async(&mut self);

    /// Starts the move; the object is unusable until [`Migrate::sync`].
    fn move_to_host_async(&mut self);

    /// Completes a pending asynchronous move. No-op when none is pending.
    fn sync(&mut self);

    fn is_host(&self) -> bool {
        matches!(self.placement(), Placement::Host)
    }

    fn is_accelerator(&self) -> bool {
        !self.is_host()
    }
}

/// A storage on its way to another placement.
#[derive(Debug)]
pub(crate) enum InFlight<T> {
    Ready(Storage<T>),
    Download {
        device: Arc<AcceleratorDevice>,
        read: PendingRead,
    },
}

impl<T: Scalar> InFlight<T> {
    pub(crate) fn complete(self) -> Storage<T> {
        match self {
            InFlight::Ready(storage) => storage,
            InFlight::Download { device, read } => match device.gpu() {
                Some(ctx) => Storage::Host(device_ok(pollster::block_on(ctx.finish_read(read)))),
                None => crate::contract_violation!(
                    DeviceFault,
                    "pending GPU readback on a non-GPU device"
                ),
            },
        }
    }
}

/// Starts moving `storage` to `target`. GPU readbacks are only submitted;
/// everything else is produced immediately.
pub(crate) fn start_move<T: Scalar>(
    storage: &Storage<T>,
    target: &Placement,
    label: &str,
) -> InFlight<T> {
    if storage.placement().same_as(target) {
        return InFlight::Ready(storage.duplicate(label));
    }
    if let (
        Storage::Device {
            device,
            memory: DeviceMemory::Gpu { buffer, len },
        },
        Placement::Host,
    ) = (storage, target)
    {
        if let Some(ctx) = device.gpu() {
            let read = device_ok(ctx.begin_read::<T>(buffer, 0, *len));
            return InFlight::Download {
                device: Arc::clone(device),
                read,
            };
        }
    }
    InFlight::Ready(Storage::from_vec(target, storage.to_vec(), label))
}

/// Synchronous move of a single storage.
pub(crate) fn move_storage<T: Scalar>(
    storage: &Storage<T>,
    target: &Placement,
    label: &str,
) -> Storage<T> {
    start_move(storage, target, label).complete()
}

/// Resolves the placement a `move_to_accelerator` call should target.
pub(crate) fn accelerator_target(
    accelerator: Option<&Arc<AcceleratorDevice>>,
    what: &str,
) -> Option<Placement> {
    match accelerator {
        Some(device) => Some(Placement::Accelerator(Arc::clone(device))),
        None => {
            log::warn!(
                "No accelerator available, '{}' stays on the host",
                what
            );
            None
        }
    }
}
