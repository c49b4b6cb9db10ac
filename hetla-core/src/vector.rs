use crate::backend::{BackendDescriptor, BackendTag};
use crate::host_ops;
use crate::memory::{Placement, Storage, View, ViewMut};
use crate::migration::{self, InFlight, Migrate};
use crate::ops;
use crate::scalar::{Real, Scalar, ScalarKind};
use std::sync::Arc;

#[derive(Debug)]
struct PendingMove<T> {
    data: InFlight<T>,
    index: Option<InFlight<i32>>,
}

/// A resizable array living either on the host or on an accelerator.
///
/// Operations validate sizes and placements before any kernel runs; a
/// mismatch is a contract violation (see [`crate::contract`]).
#[derive(Debug)]
pub struct Vector<T: Scalar> {
    name: String,
    backend: Arc<BackendDescriptor>,
    data: Storage<T>,
    /// Optional subset of positions used by the index accessors.
    index: Option<Storage<i32>>,
    pending: Option<PendingMove<T>>,
}

#[cold]
fn mixed_spaces(op: &str) -> ! {
    contract_violation!(
        Precondition,
        "{}: operands live in different memory spaces",
        op
    )
}

impl<T: Scalar> Vector<T> {
    /// An empty host vector.
    pub fn new(backend: &Arc<BackendDescriptor>) -> Self {
        Self {
            name: String::new(),
            backend: Arc::clone(backend),
            data: Storage::Host(Vec::new()),
            index: None,
            pending: None,
        }
    }

    /// A zero-filled host vector of `size` elements.
    pub fn with_size(backend: &Arc<BackendDescriptor>, name: &str, size: usize) -> Self {
        let mut v = Self::new(backend);
        v.allocate(name, size);
        v
    }

    /// A host vector holding a copy of `data`.
    pub fn from_slice(backend: &Arc<BackendDescriptor>, name: &str, data: &[T]) -> Self {
        let mut v = Self::new(backend);
        v.name = name.to_string();
        v.data = Storage::Host(data.to_vec());
        v
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn backend(&self) -> &Arc<BackendDescriptor> {
        &self.backend
    }

    pub fn backend_tag(&self) -> BackendTag {
        if self.data.is_host() {
            BackendTag::Host
        } else {
            BackendTag::Accelerator
        }
    }

    /// Logs a one-line description of the vector.
    pub fn info(&self) {
        log::info!(
            "Vector name={}; size={}; scalar={:?}; backend={}; index_size={}",
            self.name,
            self.size(),
            T::KIND,
            self.data.placement(),
            self.index_size()
        );
    }

    /// Zero-filled storage of `size` elements on the current placement.
    /// Prior storage (and index subset) is released first.
    pub fn allocate(&mut self, name: &str, size: usize) {
        self.ready("Allocate");
        if !self.is_empty() {
            self.clear();
        }
        self.name = name.to_string();
        log::debug!("Allocating vector '{}' with {} elements", self.name, size);
        self.data = Storage::zeroed(&self.data.placement(), size, name);
    }

    /// Releases storage and index subset; the placement is kept.
    pub fn clear(&mut self) {
        self.ready("Clear");
        self.data = Storage::empty(&self.data.placement());
        self.index = None;
    }

    // --- checks ---

    fn ready(&self, op: &str) {
        require!(
            self.pending.is_none(),
            "{} on '{}' while an asynchronous transfer is in flight",
            op,
            self.name
        );
    }

    fn check_operand<U: Scalar>(&self, other: &Vector<U>, op: &str) {
        other.ready(op);
        let (mine, theirs) = (self.data.placement(), other.data.placement());
        require!(
            mine.same_as(&theirs),
            "{}: '{}' is on {} but '{}' is on {}",
            op,
            self.name,
            mine,
            other.name,
            theirs
        );
    }

    fn check_same_size<U: Scalar>(&self, other: &Vector<U>, op: &str) {
        self.check_operand(other, op);
        require!(
            self.size() == other.size(),
            "{}: size of '{}' ({}) differs from '{}' ({})",
            op,
            self.name,
            self.size(),
            other.name,
            other.size()
        );
    }

    fn check_kernels(&self, kind: ScalarKind, op: &str) {
        if let Placement::Accelerator(device) = self.data.placement() {
            if !device.supports_kernels(kind) {
                contract_violation!(
                    Unsupported,
                    "{} is not available for {:?} on {}",
                    op,
                    kind,
                    device.name()
                );
            }
        }
    }

    fn check_arithmetic(&self, op: &str) {
        self.ready(op);
        if let Placement::Accelerator(device) = self.data.placement() {
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

    // --- copies ---

    fn allocate_like<U: Scalar>(&mut self, src: &Vector<U>) {
        if self.is_empty() && !src.is_empty() {
            let name = if self.name.is_empty() {
                src.name.clone()
            } else {
                self.name.clone()
            };
            self.allocate(&name, src.size());
        }
    }

    /// Copies all values from `src`, which may live anywhere. An empty
    /// destination is first allocated to the source size.
    pub fn copy_from(&mut self, src: &Vector<T>) {
        self.ready("CopyFrom");
        src.ready("CopyFrom");
        self.allocate_like(src);
        require!(
            self.size() == src.size(),
            "CopyFrom: size of '{}' ({}) differs from '{}' ({})",
            self.name,
            self.size(),
            src.name,
            src.size()
        );
        let target = self.data.placement();
        if target.same_as(&src.data.placement()) {
            self.data
                .copy_within_placement(0, &src.data, 0, src.size());
        } else {
            let staged = src.data.to_vec();
            self.data.write_range(0, &staged);
        }
        if self.index.is_none() {
            if let Some(index) = &src.index {
                self.index = Some(migration::move_storage(index, &target, "index"));
            }
        }
    }

    /// Copies `count` values from `src[src_offset..]` into `self[dst_offset..]`.
    /// Both vectors must share a placement.
    pub fn copy_from_range(
        &mut self,
        src: &Vector<T>,
        src_offset: usize,
        dst_offset: usize,
        count: usize,
    ) {
        self.ready("CopyFromRange");
        self.check_operand(src, "CopyFromRange");
        require!(
            src_offset + count <= src.size() && dst_offset + count <= self.size(),
            "CopyFromRange: range of {} from {} into {} exceeds sizes {} / {}",
            count,
            src_offset,
            dst_offset,
            src.size(),
            self.size()
        );
        self.data
            .copy_within_placement(dst_offset, &src.data, src_offset, count);
    }

    /// Overwrites the contents with host data of the same length.
    pub fn copy_from_data(&mut self, data: &[T]) {
        self.ready("CopyFromData");
        require!(
            data.len() == self.size(),
            "CopyFromData: {} values for vector '{}' of size {}",
            data.len(),
            self.name,
            self.size()
        );
        self.data.write_range(0, data);
    }

    pub fn copy_to_data(&self, data: &mut [T]) {
        self.ready("CopyToData");
        require!(
            data.len() == self.size(),
            "CopyToData: buffer of {} for vector '{}' of size {}",
            data.len(),
            self.name,
            self.size()
        );
        data.copy_from_slice(&self.data.to_vec());
    }

    /// Host copy of the contents.
    pub fn to_vec(&self) -> Vec<T> {
        self.ready("ToVec");
        self.data.to_vec()
    }

    pub fn get_continuous_values(&self, start: usize, end: usize) -> Vec<T> {
        self.ready("GetContinuousValues");
        require!(
            start <= end && end <= self.size(),
            "GetContinuousValues: range {}..{} outside vector '{}' of size {}",
            start,
            end,
            self.name,
            self.size()
        );
        self.data.read_range(start, end - start)
    }

    pub fn set_continuous_values(&mut self, start: usize, values: &[T]) {
        self.ready("SetContinuousValues");
        require!(
            start + values.len() <= self.size(),
            "SetContinuousValues: {} values at {} outside vector '{}' of size {}",
            values.len(),
            start,
            self.name,
            self.size()
        );
        self.data.write_range(start, values);
    }

    // --- fill ---

    pub fn set_values(&mut self, value: T) {
        self.ready("SetValues");
        self.check_kernels(T::KIND, "SetValues");
        let n = self.size();
        let backend = &self.backend;
        match self.data.view_mut() {
            ViewMut::Slice(out) => backend.install(|| host_ops::fill(out, value)),
            ViewMut::Gpu(ctx, out) => ops::fill(ctx, out, n, value),
        }
    }

    pub fn zeros(&mut self) {
        self.set_values(T::zero());
    }

    pub fn ones(&mut self) {
        self.set_values(T::one());
    }

    // --- arithmetic ---

    /// `self = a*self + b*x + c*y`; `y` absent means `c` is ignored.
    fn combine(&mut self, op: &str, x: &Vector<T>, y: Option<&Vector<T>>, coeffs: (T, T, T)) {
        self.check_arithmetic(op);
        self.check_same_size(x, op);
        if let Some(y) = y {
            self.check_same_size(y, op);
        }
        let (a, b, c) = coeffs;
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), x.data.view(), y.map(|y| y.data.view())) {
            (ViewMut::Slice(out), View::Slice(x), None) => {
                backend.install(|| host_ops::axpby(out, x, a, b))
            }
            (ViewMut::Slice(out), View::Slice(x), Some(View::Slice(y))) => {
                backend.install(|| host_ops::axpbypcz(out, x, y, a, b, c))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, xb), None) => {
                ops::axpbypcz(ctx, out, xb, xb, n, 0, 0, (a, b, T::zero()))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, xb), Some(View::Gpu(_, yb))) => {
                ops::axpbypcz(ctx, out, xb, yb, n, 0, 0, (a, b, c))
            }
            _ => mixed_spaces(op),
        }
    }

    /// `self += alpha * x`
    pub fn add_scale(&mut self, x: &Vector<T>, alpha: T) {
        self.combine("AddScale", x, None, (T::one(), alpha, T::zero()));
    }

    /// `self = alpha * self + x`
    pub fn scale_add(&mut self, alpha: T, x: &Vector<T>) {
        self.combine("ScaleAdd", x, None, (alpha, T::one(), T::zero()));
    }

    /// `self = alpha * self + beta * x`
    pub fn scale_add_scale(&mut self, alpha: T, x: &Vector<T>, beta: T) {
        self.combine("ScaleAddScale", x, None, (alpha, beta, T::zero()));
    }

    /// `self = alpha * self + beta * x + gamma * y`
    pub fn scale_add2(&mut self, alpha: T, x: &Vector<T>, beta: T, y: &Vector<T>, gamma: T) {
        self.combine("ScaleAdd2", x, Some(y), (alpha, beta, gamma));
    }

    /// `self[dst_offset..][..count] = alpha * self[..] + beta * x[src_offset..][..count]`
    pub fn scale_add_scale_range(
        &mut self,
        alpha: T,
        x: &Vector<T>,
        beta: T,
        src_offset: usize,
        dst_offset: usize,
        count: usize,
    ) {
        const OP: &str = "ScaleAddScaleRange";
        self.check_arithmetic(OP);
        self.check_operand(x, OP);
        require!(
            src_offset + count <= x.size() && dst_offset + count <= self.size(),
            "{}: range of {} from {} into {} exceeds sizes {} / {}",
            OP,
            count,
            src_offset,
            dst_offset,
            x.size(),
            self.size()
        );
        if count == 0 {
            return;
        }
        let backend = &self.backend;
        match (self.data.view_mut(), x.data.view()) {
            (ViewMut::Slice(out), View::Slice(x)) => backend.install(|| {
                host_ops::axpby(
                    &mut out[dst_offset..dst_offset + count],
                    &x[src_offset..src_offset + count],
                    alpha,
                    beta,
                )
            }),
            (ViewMut::Gpu(ctx, out), View::Gpu(_, xb)) => ops::axpbypcz(
                ctx,
                out,
                xb,
                xb,
                count,
                src_offset,
                dst_offset,
                (alpha, beta, T::zero()),
            ),
            _ => mixed_spaces(OP),
        }
    }

    /// `self = alpha * self`
    pub fn scale(&mut self, alpha: T) {
        self.check_arithmetic("Scale");
        let n = self.size();
        let backend = &self.backend;
        match self.data.view_mut() {
            ViewMut::Slice(out) => backend.install(|| host_ops::scale(out, alpha)),
            ViewMut::Gpu(ctx, out) => ops::scale(ctx, out, n, alpha),
        }
    }

    /// `self[i] *= x[i]`
    pub fn pointwise_mult(&mut self, x: &Vector<T>) {
        const OP: &str = "PointWiseMult";
        self.check_arithmetic(OP);
        self.check_same_size(x, OP);
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), x.data.view()) {
            (ViewMut::Slice(out), View::Slice(x)) => {
                backend.install(|| host_ops::pointwise_mult(out, x))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, xb)) => ops::pointwise::<T>(ctx, out, xb, None, n),
            _ => mixed_spaces(OP),
        }
    }

    /// `self[i] = x[i] * y[i]`
    pub fn pointwise_mult2(&mut self, x: &Vector<T>, y: &Vector<T>) {
        const OP: &str = "PointWiseMult2";
        self.check_arithmetic(OP);
        self.check_same_size(x, OP);
        self.check_same_size(y, OP);
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), x.data.view(), y.data.view()) {
            (ViewMut::Slice(out), View::Slice(x), View::Slice(y)) => {
                backend.install(|| host_ops::pointwise_mult2(out, x, y))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, xb), View::Gpu(_, yb)) => {
                ops::pointwise::<T>(ctx, out, xb, Some(yb), n)
            }
            _ => mixed_spaces(OP),
        }
    }

    // --- reductions ---

    pub fn dot(&self, x: &Vector<T>) -> T {
        const OP: &str = "Dot";
        self.check_arithmetic(OP);
        self.check_same_size(x, OP);
        match (self.data.view(), x.data.view()) {
            (View::Slice(a), View::Slice(b)) => self.backend.install(|| host_ops::dot(a, b)),
            (View::Gpu(ctx, a), View::Gpu(_, b)) => ops::dot::<T>(ctx, a, b, self.size()),
            _ => mixed_spaces(OP),
        }
    }

    /// Sum of all entries.
    pub fn reduce(&self) -> T {
        self.check_arithmetic("Reduce");
        match self.data.view() {
            View::Slice(a) => self.backend.install(|| host_ops::sum(a)),
            View::Gpu(ctx, a) => ops::sum::<T>(ctx, a, self.size()),
        }
    }

    /// Sum of absolute values.
    pub fn asum(&self) -> T {
        self.check_arithmetic("Asum");
        match self.data.view() {
            View::Slice(a) => self.backend.install(|| host_ops::asum(a)),
            View::Gpu(ctx, a) => ops::asum::<T>(ctx, a, self.size()),
        }
    }

    /// Position and magnitude of the first entry of largest magnitude;
    /// `(0, 0)` for an empty vector.
    pub fn amax(&self) -> (usize, T) {
        self.check_arithmetic("Amax");
        match self.data.view() {
            View::Slice(a) => self.backend.install(|| host_ops::amax(a)),
            View::Gpu(ctx, a) => ops::amax::<T>(ctx, a, self.size()),
        }
    }

    // --- permutations ---

    fn check_permutation(&self, perm: &Vector<i32>, bound: usize, op: &str) {
        self.check_operand(perm, op);
        let in_bounds = match perm.data.view() {
            View::Slice(p) => self.backend.install(|| host_ops::indices_in_bounds(p, bound)),
            View::Gpu(ctx, p) => {
                let entries = ops::read_back::<i32>(ctx, p, perm.size());
                self.backend
                    .install(|| host_ops::indices_in_bounds(&entries, bound))
            }
        };
        require!(
            in_bounds,
            "{}: permutation '{}' has entries outside 0..{}",
            op,
            perm.name,
            bound
        );
    }

    /// Moves entry `i` to position `perm[i]`.
    pub fn permute(&mut self, perm: &Vector<i32>) {
        self.permute_in_place(perm, false, "Permute");
    }

    /// Entry `i` becomes the former entry `perm[i]`.
    pub fn permute_backward(&mut self, perm: &Vector<i32>) {
        self.permute_in_place(perm, true, "PermuteBackward");
    }

    fn permute_in_place(&mut self, perm: &Vector<i32>, gather: bool, op: &str) {
        self.ready(op);
        self.check_kernels(T::KIND, op);
        self.check_same_size(perm, op);
        self.check_permutation(perm, self.size(), op);
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), perm.data.view()) {
            (ViewMut::Slice(out), View::Slice(p)) => {
                let src = out.to_vec();
                backend.install(|| permute_host(out, &src, p, gather))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, pb)) => {
                let src = ops::clone_buffer(ctx, out, "permute source");
                ops::permute::<T>(ctx, out, &src, pb, n, n, gather)
            }
            _ => mixed_spaces(op),
        }
    }

    /// `self[perm[i]] = src[i]`
    pub fn copy_from_permute(&mut self, src: &Vector<T>, perm: &Vector<i32>) {
        self.copy_permuted(src, perm, false, "CopyFromPermute");
    }

    /// `self[i] = src[perm[i]]`
    pub fn copy_from_permute_backward(&mut self, src: &Vector<T>, perm: &Vector<i32>) {
        self.copy_permuted(src, perm, true, "CopyFromPermuteBackward");
    }

    fn copy_permuted(&mut self, src: &Vector<T>, perm: &Vector<i32>, gather: bool, op: &str) {
        self.ready(op);
        src.ready(op);
        self.allocate_like(src);
        self.check_kernels(T::KIND, op);
        self.check_same_size(src, op);
        self.check_same_size(perm, op);
        self.check_permutation(perm, self.size(), op);
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), src.data.view(), perm.data.view()) {
            (ViewMut::Slice(out), View::Slice(s), View::Slice(p)) => {
                backend.install(|| permute_host(out, s, p, gather))
            }
            (ViewMut::Gpu(ctx, out), View::Gpu(_, sb), View::Gpu(_, pb)) => {
                ops::permute::<T>(ctx, out, sb, pb, n, n, gather)
            }
            _ => mixed_spaces(op),
        }
    }

    // --- index subset ---

    /// Installs an index subset on the vector's current placement.
    pub fn set_index_array(&mut self, indices: &[i32]) {
        self.ready("SetIndexArray");
        require!(
            !indices.is_empty(),
            "SetIndexArray: empty index array for '{}'",
            self.name
        );
        let size = self.size();
        require!(
            self.backend
                .install(|| host_ops::indices_in_bounds(indices, size)),
            "SetIndexArray: indices outside 0..{} for '{}'",
            size,
            self.name
        );
        self.index = Some(Storage::from_vec(
            &self.data.placement(),
            indices.to_vec(),
            "index",
        ));
    }

    pub fn index_size(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len())
    }

    fn index_storage(&self, op: &str) -> &Storage<i32> {
        match &self.index {
            Some(index) => index,
            None => contract_violation!(Precondition, "{}: '{}' has no index array", op, self.name),
        }
    }

    /// Values at the index subset positions, in index order.
    pub fn get_index_values(&self) -> Vec<T> {
        const OP: &str = "GetIndexValues";
        self.ready(OP);
        self.check_kernels(T::KIND, OP);
        let index = self.index_storage(OP);
        let count = index.len();
        match (self.data.view(), index.view()) {
            (View::Slice(data), View::Slice(idx)) => {
                let mut out = vec![T::zero(); count];
                self.backend
                    .install(|| host_ops::gather(&mut out, data, idx));
                out
            }
            (View::Gpu(ctx, data), View::Gpu(_, idx)) => {
                let out = ops::scratch::<T>(ctx, "index values", count);
                ops::permute::<T>(ctx, &out, data, idx, count, self.size(), true);
                ops::read_back::<T>(ctx, &out, count)
            }
            _ => mixed_spaces(OP),
        }
    }

    /// Writes `values[k]` to position `index[k]`.
    pub fn set_index_values(&mut self, values: &[T]) {
        const OP: &str = "SetIndexValues";
        self.ready(OP);
        self.check_kernels(T::KIND, OP);
        let size = self.size();
        let index = match &self.index {
            Some(index) => index,
            None => contract_violation!(Precondition, "{}: '{}' has no index array", OP, self.name),
        };
        require!(
            values.len() == index.len(),
            "{}: {} values for an index array of {}",
            OP,
            values.len(),
            index.len()
        );
        let backend = &self.backend;
        match (self.data.view_mut(), index.view()) {
            (ViewMut::Slice(data), View::Slice(idx)) => {
                backend.install(|| host_ops::scatter(data, values, idx))
            }
            (ViewMut::Gpu(ctx, data), View::Gpu(_, idx)) => {
                let src = ops::upload(ctx, "index values", values);
                ops::permute::<T>(ctx, data, &src, idx, values.len(), size, false)
            }
            _ => mixed_spaces(OP),
        }
    }

    /// Raw storage access for operators in this crate.
    pub(crate) fn storage(&self) -> &Storage<T> {
        self.ready("Apply");
        &self.data
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage<T> {
        self.ready("Apply");
        &mut self.data
    }

    fn begin_move(&mut self, target: &Placement) {
        if self.data.placement().same_as(target) {
            return;
        }
        log::debug!(
            "Moving vector '{}' ({} elements) from {} to {}",
            self.name,
            self.size(),
            self.data.placement(),
            target
        );
        let data = migration::start_move(&self.data, target, &self.name);
        let index = self
            .index
            .as_ref()
            .map(|index| migration::start_move(index, target, "index"));
        self.pending = Some(PendingMove { data, index });
    }
}

fn permute_host<T: Scalar>(out: &mut [T], src: &[T], perm: &[i32], gather: bool) {
    if gather {
        host_ops::gather(out, src, perm)
    } else {
        host_ops::scatter(out, src, perm)
    }
}

impl<T: Real> Vector<T> {
    /// Euclidean norm.
    pub fn norm(&self) -> T {
        self.dot(self).sqrt()
    }

    /// `self[i] = self[i]^exponent`
    pub fn power(&mut self, exponent: T) {
        self.check_arithmetic("Power");
        let n = self.size();
        let backend = &self.backend;
        match self.data.view_mut() {
            ViewMut::Slice(out) => backend.install(|| host_ops::power(out, exponent)),
            ViewMut::Gpu(ctx, out) if T::KIND == ScalarKind::F32 => {
                ops::power_f32(ctx, out, n, exponent.to_f64_lossy() as f32)
            }
            ViewMut::Gpu(..) => {
                log::warn!(
                    "Power on '{}': no {:?} kernel, evaluating on the host",
                    self.name,
                    T::KIND
                );
                let mut values = self.data.to_vec();
                backend.install(|| host_ops::power(&mut values, exponent));
                self.data.write_range(0, &values);
            }
        }
    }

    /// Converting copy from an `f32` vector on the same placement.
    pub fn copy_from_float(&mut self, src: &Vector<f32>) {
        self.copy_from_cast(src, "CopyFromFloat");
    }

    /// Converting copy from an `f64` vector on the same placement.
    pub fn copy_from_double(&mut self, src: &Vector<f64>) {
        self.copy_from_cast(src, "CopyFromDouble");
    }

    fn copy_from_cast<S: Real>(&mut self, src: &Vector<S>, op: &str) {
        self.ready(op);
        src.ready(op);
        self.allocate_like(src);
        self.check_same_size(src, op);
        self.check_kernels(T::KIND, op);
        self.check_kernels(S::KIND, op);
        let n = self.size();
        let backend = &self.backend;
        match (self.data.view_mut(), src.data.view()) {
            (ViewMut::Slice(out), View::Slice(s)) => backend.install(|| host_ops::cast(out, s)),
            (ViewMut::Gpu(ctx, out), View::Gpu(_, sb)) => ops::convert::<S, T>(ctx, out, sb, n),
            _ => mixed_spaces(op),
        }
    }
}

impl<T: Scalar> Migrate for Vector<T> {
    fn placement(&self) -> Placement {
        self.data.placement()
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
            let data = pending.data.complete();
            let index = pending.index.map(InFlight::complete);
            self.data = data;
            if index.is_some() {
                self.index = index;
            }
        }
    }
}
