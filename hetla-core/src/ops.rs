// Accelerator kernels. Each function encodes one compute dispatch on the
// context's queue; only reductions and readbacks wait for the device.
// Callers validate sizes, placements and scalar support beforehand.

use crate::context::GpuContext;
use crate::contract::device_ok;
use crate::memory::BUFFER_USAGE;
use crate::scalar::Scalar;
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct KernelParams {
    n: u32,
    src_off: u32,
    dst_off: u32,
    mode: u32,
    stride: u32,
    aux: u32,
    _padding: [u32; 2],
}

/// Kernel counts and offsets are 32-bit on the device.
fn launch_dim(value: usize, what: &str) -> u32 {
    match u32::try_from(value) {
        Ok(v) => v,
        Err(_) => contract_violation!(
            Unsupported,
            "{} {} exceeds the accelerator's 32-bit launch range",
            what,
            value
        ),
    }
}

impl KernelParams {
    fn new(n: usize) -> Self {
        Self {
            n: launch_dim(n, "element count"),
            ..Self::default()
        }
    }

    fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    fn aux(mut self, aux: usize) -> Self {
        self.aux = launch_dim(aux, "kernel argument");
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Kernel {
    Affine,
    Axpbypcz,
    Pointwise,
    Power,
    Reduce,
    Amax,
    Permute,
    Convert,
    CsrMv,
    DenseMv,
    Laplace2d,
    CsrDiag,
    DenseDiag,
}

impl Kernel {
    fn name(self) -> &'static str {
        match self {
            Kernel::Affine => "affine",
            Kernel::Axpbypcz => "axpbypcz",
            Kernel::Pointwise => "pointwise",
            Kernel::Power => "power",
            Kernel::Reduce => "reduce",
            Kernel::Amax => "amax",
            Kernel::Permute => "permute",
            Kernel::Convert => "convert",
            Kernel::CsrMv => "csrmv",
            Kernel::DenseMv => "densemv",
            Kernel::Laplace2d => "laplace2d",
            Kernel::CsrDiag => "csr_diag",
            Kernel::DenseDiag => "dense_diag",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Kernel::Affine => include_str!("shaders/affine.wgsl"),
            Kernel::Axpbypcz => include_str!("shaders/axpbypcz.wgsl"),
            Kernel::Pointwise => include_str!("shaders/pointwise.wgsl"),
            Kernel::Power => include_str!("shaders/power.wgsl"),
            Kernel::Reduce => include_str!("shaders/reduce.wgsl"),
            Kernel::Amax => include_str!("shaders/amax.wgsl"),
            Kernel::Permute => include_str!("shaders/permute.wgsl"),
            Kernel::Convert => include_str!("shaders/convert.wgsl"),
            Kernel::CsrMv => include_str!("shaders/csrmv.wgsl"),
            Kernel::DenseMv => include_str!("shaders/densemv.wgsl"),
            Kernel::Laplace2d => include_str!("shaders/laplace2d.wgsl"),
            Kernel::CsrDiag => include_str!("shaders/csr_diag.wgsl"),
            Kernel::DenseDiag => include_str!("shaders/dense_diag.wgsl"),
        }
    }
}

/// Workgroup grid. Launches larger than `max_groups_per_dim` spill into y.
#[derive(Debug, Clone, Copy)]
struct Grid {
    x: u32,
    y: u32,
}

impl Grid {
    fn for_threads(ctx: &GpuContext, threads: u32) -> Self {
        let block = ctx.tuning.block_size;
        let groups = threads.div_ceil(block).max(1);
        let x = groups.min(ctx.tuning.max_groups_per_dim);
        Self {
            x,
            y: groups.div_ceil(x),
        }
    }

    fn groups(self) -> usize {
        (self.x * self.y) as usize
    }
}

fn instantiate(kernel: Kernel, scalar: &str, src_scalar: &str, block: u32) -> String {
    let mut source = String::from(include_str!("shaders/params.wgsl"));
    source.push_str(kernel.source());
    source
        .replace("{{SCALAR}}", scalar)
        .replace("{{SRC}}", src_scalar)
        .replace("{{WG}}", &block.to_string())
}

fn launch(
    ctx: &GpuContext,
    kernel: Kernel,
    scalars: (&str, &str),
    mut params: KernelParams,
    buffers: &[&wgpu::Buffer],
) -> Grid {
    let block = ctx.tuning.block_size;
    let grid = Grid::for_threads(ctx, params.n);
    params.stride = grid.x * block;

    let key = format!("{}<{},{}>/{}", kernel.name(), scalars.0, scalars.1, block);
    let pipeline = device_ok(ctx.pipeline(&key, || {
        instantiate(kernel, scalars.0, scalars.1, block)
    }));

    let params_buffer = ctx.create_gpu_buffer_with_data(
        "kernel params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let layout = pipeline.get_bind_group_layout(0);
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: params_buffer.as_entire_binding(),
    }];
    entries.extend(buffers.iter().enumerate().map(|(i, buffer)| wgpu::BindGroupEntry {
        binding: i as u32 + 1,
        resource: buffer.as_entire_binding(),
    }));
    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(kernel.name()),
        layout: &layout,
        entries: &entries,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(kernel.name()),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(grid.x, grid.y, 1);
    }
    ctx.queue.submit(Some(encoder.finish()));
    log::trace!(
        "Dispatched {} over {} threads ({}x{} groups)",
        key,
        params.n,
        grid.x,
        grid.y
    );
    grid
}

fn coefficients<T: Scalar>(ctx: &GpuContext, values: &[T]) -> wgpu::Buffer {
    ctx.create_gpu_buffer_with_data(
        "kernel coefficients",
        bytemuck::cast_slice(values),
        wgpu::BufferUsages::STORAGE,
    )
}

/// Zeroed storage buffer that can be read back.
pub(crate) fn scratch<T: Pod>(ctx: &GpuContext, label: &str, len: usize) -> wgpu::Buffer {
    ctx.create_empty_buffer(
        label,
        (len.max(1) * std::mem::size_of::<T>()) as u64,
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    )
}

pub(crate) fn read_back<T: Pod>(ctx: &GpuContext, buffer: &wgpu::Buffer, len: usize) -> Vec<T> {
    device_ok(pollster::block_on(ctx.read_buffer_to_cpu::<T>(buffer, 0, len)))
}

pub(crate) fn upload<T: Scalar>(ctx: &GpuContext, label: &str, data: &[T]) -> wgpu::Buffer {
    ctx.create_gpu_buffer_with_data(label, bytemuck::cast_slice(data), BUFFER_USAGE)
}

/// Device-side copy of a whole buffer.
pub(crate) fn clone_buffer(ctx: &GpuContext, buffer: &wgpu::Buffer, label: &str) -> wgpu::Buffer {
    let copy = ctx.create_empty_buffer(label, buffer.size(), BUFFER_USAGE);
    ctx.copy_buffer(buffer, 0, &copy, 0, buffer.size());
    copy
}

/// out = value
pub(crate) fn fill<T: Scalar>(ctx: &GpuContext, out: &wgpu::Buffer, n: usize, value: T) {
    let coeffs = coefficients(ctx, &[T::zero(), value]);
    launch(
        ctx,
        Kernel::Affine,
        (T::WGSL, T::WGSL),
        KernelParams::new(n).mode(1),
        &[&coeffs, out],
    );
}

/// out = alpha * out
pub(crate) fn scale<T: Scalar>(ctx: &GpuContext, out: &wgpu::Buffer, n: usize, alpha: T) {
    let coeffs = coefficients(ctx, &[alpha, T::zero()]);
    launch(
        ctx,
        Kernel::Affine,
        (T::WGSL, T::WGSL),
        KernelParams::new(n),
        &[&coeffs, out],
    );
}

/// out[dst_off..] = a*out[dst_off..] + b*x[src_off..] + c*y[src_off..] over `n` elements.
#[allow(clippy::too_many_arguments)]
pub(crate) fn axpbypcz<T: Scalar>(
    ctx: &GpuContext,
    out: &wgpu::Buffer,
    x: &wgpu::Buffer,
    y: &wgpu::Buffer,
    n: usize,
    src_off: usize,
    dst_off: usize,
    (a, b, c): (T, T, T),
) {
    let coeffs = coefficients(ctx, &[a, b, c]);
    let mut params = KernelParams::new(n);
    params.src_off = launch_dim(src_off, "source offset");
    params.dst_off = launch_dim(dst_off, "destination offset");
    launch(
        ctx,
        Kernel::Axpbypcz,
        (T::WGSL, T::WGSL),
        params,
        &[&coeffs, out, x, y],
    );
}

/// out = out*x, or out = x*y when `y` is given.
pub(crate) fn pointwise<T: Scalar>(
    ctx: &GpuContext,
    out: &wgpu::Buffer,
    x: &wgpu::Buffer,
    y: Option<&wgpu::Buffer>,
    n: usize,
) {
    let mode = u32::from(y.is_some());
    launch(
        ctx,
        Kernel::Pointwise,
        (T::WGSL, T::WGSL),
        KernelParams::new(n).mode(mode),
        &[out, x, y.unwrap_or(x)],
    );
}

pub(crate) fn power_f32(ctx: &GpuContext, out: &wgpu::Buffer, n: usize, exponent: f32) {
    let coeffs = coefficients(ctx, &[exponent]);
    launch(
        ctx,
        Kernel::Power,
        ("f32", "f32"),
        KernelParams::new(n).aux(f32::NAN.to_bits() as usize),
        &[&coeffs, out],
    );
}

fn reduce<T: Scalar>(
    ctx: &GpuContext,
    x: &wgpu::Buffer,
    y: &wgpu::Buffer,
    n: usize,
    mode: u32,
) -> T {
    if n == 0 {
        return T::zero();
    }
    let groups = Grid::for_threads(ctx, launch_dim(n, "element count")).groups();
    let partials = scratch::<T>(ctx, "reduce partials", groups);
    launch(
        ctx,
        Kernel::Reduce,
        (T::WGSL, T::WGSL),
        KernelParams::new(n).mode(mode),
        &[x, y, &partials],
    );
    read_back::<T>(ctx, &partials, groups)
        .into_iter()
        .fold(T::zero(), |acc, p| acc + p)
}

pub(crate) fn dot<T: Scalar>(ctx: &GpuContext, x: &wgpu::Buffer, y: &wgpu::Buffer, n: usize) -> T {
    reduce(ctx, x, y, n, 0)
}

pub(crate) fn sum<T: Scalar>(ctx: &GpuContext, x: &wgpu::Buffer, n: usize) -> T {
    reduce(ctx, x, x, n, 1)
}

pub(crate) fn asum<T: Scalar>(ctx: &GpuContext, x: &wgpu::Buffer, n: usize) -> T {
    reduce(ctx, x, x, n, 2)
}

pub(crate) fn amax<T: Scalar>(ctx: &GpuContext, x: &wgpu::Buffer, n: usize) -> (usize, T) {
    if n == 0 {
        return (0, T::zero());
    }
    let groups = Grid::for_threads(ctx, launch_dim(n, "element count")).groups();
    let values = scratch::<T>(ctx, "amax values", groups);
    let indices = scratch::<u32>(ctx, "amax indices", groups);
    launch(
        ctx,
        Kernel::Amax,
        (T::WGSL, T::WGSL),
        KernelParams::new(n),
        &[x, &values, &indices],
    );
    let values = read_back::<T>(ctx, &values, groups);
    let indices = read_back::<u32>(ctx, &indices, groups);
    indices
        .into_iter()
        .zip(values)
        .filter(|(i, _)| (*i as usize) < n)
        .fold((0usize, T::zero()), |best, (i, v)| {
            let i = i as usize;
            if v > best.1 || (v == best.1 && i < best.0) {
                (i, v)
            } else {
                best
            }
        })
}

/// Scatter (`out[perm[i]] = src[i]`) or gather (`out[i] = src[perm[i]]`) over
/// `n` permutation entries; `bound` is the length of the permuted side.
pub(crate) fn permute<T: Scalar>(
    ctx: &GpuContext,
    out: &wgpu::Buffer,
    src: &wgpu::Buffer,
    perm: &wgpu::Buffer,
    n: usize,
    bound: usize,
    gather: bool,
) {
    launch(
        ctx,
        Kernel::Permute,
        (T::WGSL, T::WGSL),
        KernelParams::new(n).mode(u32::from(gather)).aux(bound),
        &[src, perm, out],
    );
}

pub(crate) fn convert<S: Scalar, D: Scalar>(
    ctx: &GpuContext,
    out: &wgpu::Buffer,
    src: &wgpu::Buffer,
    n: usize,
) {
    launch(
        ctx,
        Kernel::Convert,
        (D::WGSL, S::WGSL),
        KernelParams::new(n),
        &[src, out],
    );
}

/// y = A*x, or y += alpha*A*x when `add` is set.
#[allow(clippy::too_many_arguments)]
pub(crate) fn csr_mv<T: Scalar>(
    ctx: &GpuContext,
    row_ptr: &wgpu::Buffer,
    col: &wgpu::Buffer,
    val: &wgpu::Buffer,
    x: &wgpu::Buffer,
    y: &wgpu::Buffer,
    rows: usize,
    alpha: T,
    add: bool,
) {
    let coeffs = coefficients(ctx, &[alpha]);
    launch(
        ctx,
        Kernel::CsrMv,
        (T::WGSL, T::WGSL),
        KernelParams::new(rows).mode(u32::from(add)),
        &[&coeffs, row_ptr, col, val, x, y],
    );
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn dense_mv<T: Scalar>(
    ctx: &GpuContext,
    val: &wgpu::Buffer,
    x: &wgpu::Buffer,
    y: &wgpu::Buffer,
    rows: usize,
    cols: usize,
    alpha: T,
    add: bool,
) {
    let coeffs = coefficients(ctx, &[alpha]);
    launch(
        ctx,
        Kernel::DenseMv,
        (T::WGSL, T::WGSL),
        KernelParams::new(rows).mode(u32::from(add)).aux(cols),
        &[&coeffs, val, x, y],
    );
}

pub(crate) fn laplace2d_mv<T: Scalar>(
    ctx: &GpuContext,
    x: &wgpu::Buffer,
    y: &wgpu::Buffer,
    size: usize,
    alpha: T,
    add: bool,
) {
    let coeffs = coefficients(ctx, &[alpha]);
    launch(
        ctx,
        Kernel::Laplace2d,
        (T::WGSL, T::WGSL),
        KernelParams::new(size * size).mode(u32::from(add)).aux(size),
        &[&coeffs, x, y],
    );
}

pub(crate) fn csr_diag<T: Scalar>(
    ctx: &GpuContext,
    row_ptr: &wgpu::Buffer,
    col: &wgpu::Buffer,
    val: &wgpu::Buffer,
    out: &wgpu::Buffer,
    rows: usize,
    invert: bool,
) {
    launch(
        ctx,
        Kernel::CsrDiag,
        (T::WGSL, T::WGSL),
        KernelParams::new(rows).mode(u32::from(invert)),
        &[row_ptr, col, val, out],
    );
}

pub(crate) fn dense_diag<T: Scalar>(
    ctx: &GpuContext,
    val: &wgpu::Buffer,
    out: &wgpu::Buffer,
    rows: usize,
    cols: usize,
    invert: bool,
) {
    launch(
        ctx,
        Kernel::DenseDiag,
        (T::WGSL, T::WGSL),
        KernelParams::new(rows).mode(u32::from(invert)).aux(cols),
        &[val, out],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::catch;
    use crate::ViolationKind;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn launch_dimensions_beyond_u32_are_rejected() {
        assert_eq!(KernelParams::new(1024).n, 1024);
        assert_eq!(KernelParams::new(8).aux(u32::MAX as usize).aux, u32::MAX);
        let err = catch(|| KernelParams::new(u32::MAX as usize + 1)).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Unsupported);
        let err = catch(|| launch_dim(1 << 40, "source offset")).unwrap_err();
        assert!(err.message.contains("source offset"));
    }
}
