use bytemuck::{Pod, Zeroable};
use num_traits::{Float, Num, NumCast};
use std::fmt::{Debug, Display};
use std::iter::Sum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    F64,
    I32,
}

impl ScalarKind {
    pub fn is_float(self) -> bool {
        !matches!(self, ScalarKind::I32)
    }
}

/// Element type of vectors and matrices.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + Debug
    + Display
    + Default
    + PartialOrd
    + Pod
    + Zeroable
    + Num
    + NumCast
    + Sum
    + 'static
{
    const KIND: ScalarKind;
    /// Type name used when instantiating compute shaders.
    const WGSL: &'static str;

    fn magnitude(self) -> Self;

    /// `self + rhs`. Kernels accumulate through these so integer overflow
    /// is a contract violation rather than a panic inside the host pool.
    fn plus(self, rhs: Self) -> Self {
        self + rhs
    }

    fn minus(self, rhs: Self) -> Self {
        self - rhs
    }

    fn times(self, rhs: Self) -> Self {
        self * rhs
    }

    /// Lossy conversion used for reductions and logging.
    fn to_f64_lossy(self) -> f64 {
        <f64 as NumCast>::from(self).unwrap_or(f64::NAN)
    }
}

/// Floating scalar types; solvers and norms are only defined for these.
pub trait Real: Scalar + Float {
    fn from_f64(v: f64) -> Self;
}

impl Scalar for f32 {
    const KIND: ScalarKind = ScalarKind::F32;
    const WGSL: &'static str = "f32";

    fn magnitude(self) -> Self {
        self.abs()
    }
}

impl Scalar for f64 {
    const KIND: ScalarKind = ScalarKind::F64;
    const WGSL: &'static str = "f64";

    fn magnitude(self) -> Self {
        self.abs()
    }
}

impl Scalar for i32 {
    const KIND: ScalarKind = ScalarKind::I32;
    const WGSL: &'static str = "i32";

    fn magnitude(self) -> Self {
        match self.checked_abs() {
            Some(v) => v,
            None => contract_violation!(Precondition, "i32 overflow in |{}|", self),
        }
    }

    fn plus(self, rhs: Self) -> Self {
        match self.checked_add(rhs) {
            Some(v) => v,
            None => contract_violation!(Precondition, "i32 overflow in {} + {}", self, rhs),
        }
    }

    fn minus(self, rhs: Self) -> Self {
        match self.checked_sub(rhs) {
            Some(v) => v,
            None => contract_violation!(Precondition, "i32 overflow in {} - {}", self, rhs),
        }
    }

    fn times(self, rhs: Self) -> Self {
        match self.checked_mul(rhs) {
            Some(v) => v,
            None => contract_violation!(Precondition, "i32 overflow in {} * {}", self, rhs),
        }
    }
}

impl Real for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Real for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
}
