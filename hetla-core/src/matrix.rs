use crate::backend::BackendDescriptor;
use crate::dense_matrix::DenseMatrix;
use crate::host_ops;
use crate::memory::{Placement, Storage, View, ViewMut};
use crate::migration::{self, InFlight, Migrate};
use crate::ops;
use crate::scalar::Scalar;
use crate::sparse_matrix::{CsrMatrix, Triplet};
use crate::traits::Dimensions;
use crate::vector::Vector;
use std::sync::Arc;

/// Storage format of a [`LocalMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Csr,
    /// Row-major dense.
    Dense,
    /// Matrix-free five-point Laplacian on a square grid.
    Laplace2D,
}

#[derive(Debug)]
enum Layout<T> {
    Csr {
        row_ptr: Storage<i32>,
        col: Storage<i32>,
        values: Storage<T>,
    },
    Dense {
        values: Storage<T>,
    },
    Laplace2D {
        size: usize,
    },
}

#[derive(Debug)]
enum PendingLayout<T> {
    Csr {
        row_ptr: InFlight<i32>,
        col: InFlight<i32>,
        values: InFlight<T>,
    },
    Dense {
        values: InFlight<T>,
    },
    Laplace2D {
        size: usize,
    },
}

#[derive(Debug)]
struct PendingMove<T> {
    target: Placement,
    layout: PendingLayout<T>,
}

/// A linear operator on a single backend.
#[derive(Debug)]
pub struct LocalMatrix<T: Scalar> {
    name: String,
    backend: Arc<BackendDescriptor>,
    rows: usize,
    cols: usize,
    nnz: usize,
    placement: Placement,
    layout: Layout<T>,
    pending: Option<PendingMove<T>>,
}

#[cold]
fn mixed_spaces(op: &str) -> ! {
    contract_violation!(
        Precondition,
        "{}: operator and vectors live in different memory spaces",
        op
    )
}

/// Reads an extracted diagonal back so a zero entry can be rejected before
/// the device computes `1/0`.
fn device_diagonal_nonzero<T: Scalar>(
    ctx: &crate::context::GpuContext,
    diag: &wgpu::Buffer,
    rows: usize,
) -> bool {
    !ops::read_back::<T>(ctx, diag, rows)
        .iter()
        .any(|v| v.is_zero())
}

impl<T: Scalar> LocalMatrix<T> {
    fn on_host(
        backend: &Arc<BackendDescriptor>,
        name: &str,
        (rows, cols, nnz): (usize, usize, usize),
        layout: Layout<T>,
    ) -> Self {
        log::debug!(
            "Created matrix '{}' ({}x{}, nnz={}) on the host",
            name,
            rows,
            cols,
            nnz
        );
        Self {
            name: name.to_string(),
            backend: Arc::clone(backend),
            rows,
            cols,
            nnz,
            placement: Placement::Host,
            layout,
            pending: None,
        }
    }

    pub fn from_csr(backend: &Arc<BackendDescriptor>, name: &str, csr: CsrMatrix<T>) -> Self {
        let (rows, cols, nnz) = (csr.rows(), csr.cols(), csr.nnz());
        let layout = Self::csr_layout(&Placement::Host, &csr, name);
        Self::on_host(backend, name, (rows, cols, nnz), layout)
    }

    pub fn from_dense(backend: &Arc<BackendDescriptor>, name: &str, dense: DenseMatrix<T>) -> Self {
        let (rows, cols) = dense.dims();
        let layout = Layout::Dense {
            values: Storage::Host(dense.into_data()),
        };
        Self::on_host(backend, name, (rows, cols, rows * cols), layout)
    }

    /// Five-point Laplacian on a `size` x `size` grid; no entries are stored.
    pub fn laplace2d(backend: &Arc<BackendDescriptor>, name: &str, size: usize) -> Self {
        let n = size * size;
        Self::on_host(backend, name, (n, n, 5 * n), Layout::Laplace2D { size })
    }

    fn csr_layout(placement: &Placement, csr: &CsrMatrix<T>, name: &str) -> Layout<T> {
        let (row_ptr, col) = csr.device_structure();
        Layout::Csr {
            row_ptr: Storage::from_vec(placement, row_ptr, name),
            col: Storage::from_vec(placement, col, name),
            values: Storage::from_vec(placement, csr.values().to_vec(), name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn format(&self) -> MatrixFormat {
        match self.layout {
            Layout::Csr { .. } => MatrixFormat::Csr,
            Layout::Dense { .. } => MatrixFormat::Dense,
            Layout::Laplace2D { .. } => MatrixFormat::Laplace2D,
        }
    }

    pub fn backend(&self) -> &Arc<BackendDescriptor> {
        &self.backend
    }

    pub fn info(&self) {
        log::info!(
            "LocalMatrix name={}; rows={}; cols={}; nnz={}; format={:?}; backend={}",
            self.name,
            self.rows,
            self.cols,
            self.nnz,
            self.format(),
            self.placement
        );
    }

    fn ready(&self, op: &str) {
        require!(
            self.pending.is_none(),
            "{} on matrix '{}' while an asynchronous transfer is in flight",
            op,
            self.name
        );
    }

    fn check_vector(&self, v: &Vector<T>, expected: usize, op: &str, role: &str) {
        require!(
            v.size() == expected,
            "{}: {} vector '{}' has size {}, matrix '{}' needs {}",
            op,
            role,
            v.name(),
            v.size(),
            self.name,
            expected
        );
        let placement = v.placement();
        require!(
            self.placement.same_as(&placement),
            "{}: matrix '{}' is on {} but {} vector '{}' is on {}",
            op,
            self.name,
            self.placement,
            role,
            v.name(),
            placement
        );
    }

    fn check_arithmetic(&self, op: &str) {
        if let Placement::Accelerator(device) = &self.placement {
            if !device.supports_arithmetic(T::KIND) {
                contract_violation!(
                    Unsupported,
                    "{} is not available for {:?} on {}",
                    op,
                    T::KIND,
                    device.name()
                );
            }
        }
    }

    /// `y = A * x`
    pub fn apply(&self, x: &Vector<T>, y: &mut Vector<T>) {
        self.product("Apply", x, y, T::one(), false);
    }

    /// `y += scalar * A * x`
    pub fn apply_add(&self, x: &Vector<T>, scalar: T, y: &mut Vector<T>) {
        self.product("ApplyAdd", x, y, scalar, true);
    }

    fn product(&self, op: &str, x: &Vector<T>, y: &mut Vector<T>, alpha: T, add: bool) {
        self.ready(op);
        self.check_vector(x, self.cols, op, "input");
        self.check_vector(y, self.rows, op, "output");
        self.check_arithmetic(op);
        if self.rows == 0 {
            return;
        }
        // No stored entries: the product is zero.
        if self.cols == 0 || self.nnz == 0 {
            if !add {
                y.zeros();
            }
            return;
        }
        let backend = &self.backend;
        let rows = self.rows;
        let (xs, ys) = (x.storage(), y.storage_mut());
        match &self.layout {
            Layout::Csr {
                row_ptr,
                col,
                values,
            } => match (
                row_ptr.view(),
                col.view(),
                values.view(),
                xs.view(),
                ys.view_mut(),
            ) {
                (
                    View::Slice(rp),
                    View::Slice(c),
                    View::Slice(v),
                    View::Slice(x),
                    ViewMut::Slice(y),
                ) => backend.install(|| host_ops::csr_mv(rp, c, v, x, y, alpha, add)),
                (
                    View::Gpu(ctx, rp),
                    View::Gpu(_, c),
                    View::Gpu(_, v),
                    View::Gpu(_, xb),
                    ViewMut::Gpu(_, yb),
                ) => ops::csr_mv(ctx, rp, c, v, xb, yb, rows, alpha, add),
                _ => mixed_spaces(op),
            },
            Layout::Dense { values } => {
                let cols = self.cols;
                match (values.view(), xs.view(), ys.view_mut()) {
                    (View::Slice(v), View::Slice(x), ViewMut::Slice(y)) => {
                        backend.install(|| host_ops::dense_mv(v, cols, x, y, alpha, add))
                    }
                    (View::Gpu(ctx, v), View::Gpu(_, xb), ViewMut::Gpu(_, yb)) => {
                        ops::dense_mv(ctx, v, xb, yb, rows, cols, alpha, add)
                    }
                    _ => mixed_spaces(op),
                }
            }
            Layout::Laplace2D { size } => {
                let size = *size;
                match (xs.view(), ys.view_mut()) {
                    (View::Slice(x), ViewMut::Slice(y)) => {
                        backend.install(|| host_ops::laplace2d_mv(size, x, y, alpha, add))
                    }
                    (View::Gpu(ctx, xb), ViewMut::Gpu(_, yb)) => {
                        ops::laplace2d_mv(ctx, xb, yb, size, alpha, add)
                    }
                    _ => mixed_spaces(op),
                }
            }
        }
    }

    /// Writes the main diagonal into `diag`. An empty `diag` is allocated first.
    pub fn extract_diagonal(&self, diag: &mut Vector<T>) {
        self.diagonal_into("ExtractDiagonal", diag, false);
    }

    /// Writes the reciprocal of the main diagonal into `diag`. A zero
    /// diagonal entry is a contract violation on the host.
    pub fn extract_inverse_diagonal(&self, diag: &mut Vector<T>) {
        self.diagonal_into("ExtractInverseDiagonal", diag, true);
    }

    fn diagonal_into(&self, op: &str, diag: &mut Vector<T>, invert: bool) {
        self.ready(op);
        require!(
            self.is_square(),
            "{}: matrix '{}' is {}x{}, not square",
            op,
            self.name,
            self.rows,
            self.cols
        );
        self.check_arithmetic(op);
        if diag.is_empty() && self.rows > 0 {
            let name = format!("{} diagonal", self.name);
            diag.allocate(&name, self.rows);
        }
        self.check_vector(diag, self.rows, op, "diagonal");
        if self.rows == 0 {
            return;
        }
        let four = T::from(4).unwrap_or_else(T::zero);
        let backend = &self.backend;
        let rows = self.rows;
        if invert && self.nnz == 0 {
            self.zero_diagonal(op);
        }
        let out = diag.storage_mut();
        let inverted = match &self.layout {
            Layout::Laplace2D { .. } => {
                let value = if invert { T::one() / four } else { four };
                match out.view_mut() {
                    ViewMut::Slice(d) => backend.install(|| host_ops::fill(d, value)),
                    ViewMut::Gpu(ctx, d) => ops::fill(ctx, d, rows, value),
                }
                true
            }
            Layout::Csr { .. } if self.nnz == 0 => {
                match out.view_mut() {
                    ViewMut::Slice(d) => backend.install(|| host_ops::fill(d, T::zero())),
                    ViewMut::Gpu(ctx, d) => ops::fill(ctx, d, rows, T::zero()),
                }
                true
            }
            Layout::Csr {
                row_ptr,
                col,
                values,
            } => match (row_ptr.view(), col.view(), values.view(), out.view_mut()) {
                (View::Slice(rp), View::Slice(c), View::Slice(v), ViewMut::Slice(d)) => {
                    backend.install(|| {
                        host_ops::csr_diag(rp, c, v, d);
                        !invert || host_ops::invert(d)
                    })
                }
                (View::Gpu(ctx, rp), View::Gpu(_, c), View::Gpu(_, v), ViewMut::Gpu(_, d)) => {
                    ops::csr_diag::<T>(ctx, rp, c, v, d, rows, false);
                    let nonzero = !invert || device_diagonal_nonzero::<T>(ctx, d, rows);
                    if invert && nonzero {
                        ops::csr_diag::<T>(ctx, rp, c, v, d, rows, true);
                    }
                    nonzero
                }
                _ => mixed_spaces(op),
            },
            Layout::Dense { values } => {
                let cols = self.cols;
                match (values.view(), out.view_mut()) {
                    (View::Slice(v), ViewMut::Slice(d)) => backend.install(|| {
                        host_ops::dense_diag(v, cols, d);
                        !invert || host_ops::invert(d)
                    }),
                    (View::Gpu(ctx, v), ViewMut::Gpu(_, d)) => {
                        ops::dense_diag::<T>(ctx, v, d, rows, cols, false);
                        let nonzero = !invert || device_diagonal_nonzero::<T>(ctx, d, rows);
                        if invert && nonzero {
                            ops::dense_diag::<T>(ctx, v, d, rows, cols, true);
                        }
                        nonzero
                    }
                    _ => mixed_spaces(op),
                }
            }
        };
        if !inverted {
            self.zero_diagonal(op);
        }
    }

    #[cold]
    fn zero_diagonal(&self, op: &str) -> ! {
        contract_violation!(
            Precondition,
            "{}: matrix '{}' has a zero diagonal entry",
            op,
            self.name
        )
    }

    /// Gershgorin bounds `(lambda_min, lambda_max)`.
    pub fn gershgorin(&self) -> (T, T) {
        self.ready("Gershgorin");
        if let Layout::Laplace2D { size } = self.layout {
            return laplace2d_gershgorin(size);
        }
        if self.is_accelerator() {
            log::warn!(
                "Gershgorin on '{}': evaluated on a host copy of the matrix",
                self.name
            );
        }
        self.to_csr().gershgorin()
    }

    /// Host copy in CSR form.
    pub fn to_csr(&self) -> CsrMatrix<T> {
        self.ready("ToCsr");
        match &self.layout {
            Layout::Csr {
                row_ptr,
                col,
                values,
            } => CsrMatrix::from_device_structure(
                self.rows,
                self.cols,
                &row_ptr.to_vec(),
                &col.to_vec(),
                values.to_vec(),
            ),
            Layout::Dense { values } => {
                match DenseMatrix::new(self.rows, self.cols, values.to_vec()) {
                    Ok(dense) => CsrMatrix::from_dense(&dense),
                    Err(e) => contract_violation!(DeviceFault, "{}", e),
                }
            }
            Layout::Laplace2D { size } => laplace2d_csr(*size),
        }
    }

    /// Changes the storage format. Laplace2D operators can only be converted
    /// away from, never to.
    pub fn convert_to(&mut self, format: MatrixFormat) {
        self.ready("ConvertTo");
        if format == self.format() {
            return;
        }
        if format == MatrixFormat::Laplace2D {
            contract_violation!(
                Unsupported,
                "ConvertTo: '{}' cannot be converted to a Laplace2D stencil",
                self.name
            );
        }
        if self.is_accelerator() {
            log::warn!(
                "ConvertTo on '{}': converting through a host copy",
                self.name
            );
        }
        log::debug!(
            "Converting matrix '{}' from {:?} to {:?}",
            self.name,
            self.format(),
            format
        );
        let csr = self.to_csr();
        self.layout = match format {
            MatrixFormat::Dense => Layout::Dense {
                values: Storage::from_vec(&self.placement, csr.to_dense().into_data(), &self.name),
            },
            _ => Self::csr_layout(&self.placement, &csr, &self.name),
        };
        self.nnz = match format {
            MatrixFormat::Dense => self.rows * self.cols,
            _ => csr.nnz(),
        };
    }

    /// Host CSR transpose.
    pub fn transpose(&self) -> CsrMatrix<T> {
        self.to_csr().transpose()
    }

    /// Host CSR product `self * other`.
    pub fn multiply(&self, other: &LocalMatrix<T>) -> CsrMatrix<T> {
        require!(
            self.cols == other.rows,
            "Multiply: '{}' is {}x{} but '{}' is {}x{}",
            self.name,
            self.rows,
            self.cols,
            other.name,
            other.rows,
            other.cols
        );
        match self.to_csr().multiply(&other.to_csr()) {
            Ok(product) => product,
            Err(e) => contract_violation!(Precondition, "Multiply: {}", e),
        }
    }

    fn begin_move(&mut self, target: &Placement) {
        if self.placement.same_as(target) {
            return;
        }
        log::debug!(
            "Moving matrix '{}' ({}x{}, nnz={}) from {} to {}",
            self.name,
            self.rows,
            self.cols,
            self.nnz,
            self.placement,
            target
        );
        let layout = match &self.layout {
            Layout::Csr {
                row_ptr,
                col,
                values,
            } => PendingLayout::Csr {
                row_ptr: migration::start_move(row_ptr, target, &self.name),
                col: migration::start_move(col, target, &self.name),
                values: migration::start_move(values, target, &self.name),
            },
            Layout::Dense { values } => PendingLayout::Dense {
                values: migration::start_move(values, target, &self.name),
            },
            Layout::Laplace2D { size } => PendingLayout::Laplace2D { size: *size },
        };
        self.pending = Some(PendingMove {
            target: target.clone(),
            layout,
        });
    }
}

fn laplace2d_gershgorin<T: Scalar>(size: usize) -> (T, T) {
    let lift = |v: i32| T::from(v).unwrap_or_else(T::zero);
    match size {
        0 => (T::zero(), T::zero()),
        1 => (lift(4), lift(4)),
        2 => (lift(2), lift(6)),
        _ => (lift(0), lift(8)),
    }
}

fn laplace2d_csr<T: Scalar>(size: usize) -> CsrMatrix<T> {
    let n = size * size;
    let four = T::from(4).unwrap_or_else(T::zero);
    let minus_one = T::zero() - T::one();
    let mut triplets = Vec::with_capacity(5 * n);
    for row in 0..n {
        let (iy, ix) = (row / size, row % size);
        if iy > 0 {
            triplets.push(Triplet::new(row, row - size, minus_one));
        }
        if ix > 0 {
            triplets.push(Triplet::new(row, row - 1, minus_one));
        }
        triplets.push(Triplet::new(row, row, four));
        if ix + 1 < size {
            triplets.push(Triplet::new(row, row + 1, minus_one));
        }
        if iy + 1 < size {
            triplets.push(Triplet::new(row, row + size, minus_one));
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets).unwrap_or_else(|_| CsrMatrix::new(n, n))
}

impl<T: Scalar> Dimensions for LocalMatrix<T> {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl<T: Scalar> Migrate for LocalMatrix<T> {
    fn placement(&self) -> Placement {
        self.placement.clone()
    }

    fn move_to_accelerator(&mut self) {
        self.move_to_accelerator_async();
        self.sync();
    }

    fn move_to_host(&mut self) {
        self.move_to_host_async();
        self.sync();
    }

    fn move_to_accelerator_async(&mut self) {
        self.ready("MoveToAccelerator");
        if let Some(target) = migration::accelerator_target(self.backend.accelerator(), &self.name)
        {
            self.begin_move(&target);
        }
    }

    fn move_to_host_async(&mut self) {
        self.ready("MoveToHost");
        self.begin_move(&Placement::Host);
    }

    fn sync(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.layout = match pending.layout {
                PendingLayout::Csr {
                    row_ptr,
                    col,
                    values,
                } => Layout::Csr {
                    row_ptr: row_ptr.complete(),
                    col: col.complete(),
                    values: values.complete(),
                },
                PendingLayout::Dense { values } => Layout::Dense {
                    values: values.complete(),
                },
                PendingLayout::Laplace2D { size } => Layout::Laplace2D { size },
            };
            self.placement = pending.target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laplace_assembly_matches_stencil_bounds() {
        let csr = laplace2d_csr::<f64>(3);
        assert_eq!(csr.dims(), (9, 9));
        // 9 diagonal + 2 * 12 grid edges
        assert_eq!(csr.nnz(), 33);
        assert_eq!(csr.get(4, 4), Some(4.0));
        assert_eq!(csr.get(4, 1), Some(-1.0));
        assert_eq!(csr.get(2, 3), None);
        assert_eq!(csr.gershgorin(), laplace2d_gershgorin::<f64>(3));
        assert_eq!(laplace2d_csr::<f32>(2).gershgorin(), laplace2d_gershgorin(2));
    }
}
