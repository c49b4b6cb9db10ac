//! Fatal contract violations.
//!
//! Calling an operation with operands of the wrong size, on mismatched
//! backends, with a scalar type the backend cannot handle, or out of the
//! documented lifecycle order is a programming error. Such calls log the
//! violation and unwind with a [`ContractViolation`] payload, which callers
//! (usually tests) can recover with [`catch`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Size mismatch, backend mismatch, wrong call order, missing configuration.
    Precondition,
    /// The operation is not provided for this scalar type on this backend.
    Unsupported,
    /// The device runtime failed while executing an operation.
    DeviceFault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    pub kind: ViolationKind,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} violation at {}:{}: {}",
            self.kind, self.file, self.line, self.message
        )
    }
}

impl std::error::Error for ContractViolation {}

/// Logs the violation and unwinds with it as the panic payload.
#[cold]
pub fn raise(kind: ViolationKind, message: String, file: &'static str, line: u32) -> ! {
    let violation = ContractViolation {
        kind,
        message,
        file,
        line,
    };
    log::error!("{}", violation);
    panic::panic_any(violation)
}

/// Unwraps the result of a device runtime call; failures are fatal device faults.
#[track_caller]
pub(crate) fn device_ok<R>(result: Result<R, crate::error::CoreError>) -> R {
    match result {
        Ok(value) => value,
        Err(e) => {
            let location = panic::Location::caller();
            raise(
                ViolationKind::DeviceFault,
                e.to_string(),
                location.file(),
                location.line(),
            )
        }
    }
}

/// Runs `f`, turning a contract violation raised inside it into an `Err`.
/// Panics that are not contract violations keep unwinding.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, ContractViolation> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<ContractViolation>() {
            Ok(violation) => Err(*violation),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

/// Raises a [`ContractViolation`] of the given kind with a formatted message.
#[macro_export]
macro_rules! contract_violation {
    ($kind:ident, $($arg:tt)+) => {
        $crate::contract::raise(
            $crate::contract::ViolationKind::$kind,
            format!($($arg)+),
            file!(),
            line!(),
        )
    };
}

/// Raises a precondition violation unless `cond` holds.
#[macro_export]
macro_rules! require {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::contract_violation!(Precondition, $($arg)+);
        }
    };
}
