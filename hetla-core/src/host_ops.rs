// Host kernels. Callers run them inside the descriptor's rayon pool; these
// functions only see slices and assume lengths were validated upstream.

use crate::scalar::{Real, Scalar};
use rayon::prelude::*;

/// Below this many elements per task rayon splitting costs more than it saves.
const MIN_PAR_LEN: usize = 1 << 12;
/// Reductions sum fixed-size chunks so results do not depend on thread scheduling.
const REDUCE_CHUNK: usize = 1 << 12;

pub(crate) fn fill<T: Scalar>(out: &mut [T], value: T) {
    out.par_iter_mut()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|o| *o = value);
}

pub(crate) fn scale<T: Scalar>(out: &mut [T], alpha: T) {
    out.par_iter_mut()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|o| *o = alpha.times(*o));
}

/// out = a*out + b*x + c*y
pub(crate) fn axpbypcz<T: Scalar>(out: &mut [T], x: &[T], y: &[T], a: T, b: T, c: T) {
    out.par_iter_mut()
        .zip(x.par_iter().zip(y.par_iter()))
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, (&xi, &yi))| *o = a.times(*o).plus(b.times(xi)).plus(c.times(yi)));
}

/// out = a*out + b*x
pub(crate) fn axpby<T: Scalar>(out: &mut [T], x: &[T], a: T, b: T) {
    out.par_iter_mut()
        .zip(x.par_iter())
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, &xi)| *o = a.times(*o).plus(b.times(xi)));
}

pub(crate) fn pointwise_mult<T: Scalar>(out: &mut [T], x: &[T]) {
    out.par_iter_mut()
        .zip(x.par_iter())
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, &xi)| *o = o.times(xi));
}

pub(crate) fn pointwise_mult2<T: Scalar>(out: &mut [T], x: &[T], y: &[T]) {
    out.par_iter_mut()
        .zip(x.par_iter().zip(y.par_iter()))
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, (&xi, &yi))| *o = xi.times(yi));
}

pub(crate) fn power<T: Real>(out: &mut [T], exponent: T) {
    out.par_iter_mut()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|o| *o = o.powf(exponent));
}

pub(crate) fn cast<S: Scalar, D: Scalar>(out: &mut [D], src: &[S]) {
    out.par_iter_mut()
        .zip(src.par_iter())
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, &s)| *o = D::from(s).unwrap_or_else(D::zero));
}

fn chunked_sum<T: Scalar>(len: usize, term: impl Fn(usize) -> T + Sync) -> T {
    let partials: Vec<T> = (0..len.div_ceil(REDUCE_CHUNK))
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * REDUCE_CHUNK;
            let end = (start + REDUCE_CHUNK).min(len);
            (start..end).fold(T::zero(), |acc, i| acc.plus(term(i)))
        })
        .collect();
    partials.into_iter().fold(T::zero(), |acc, p| acc.plus(p))
}

pub(crate) fn dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    chunked_sum(x.len(), |i| x[i].times(y[i]))
}

pub(crate) fn sum<T: Scalar>(x: &[T]) -> T {
    chunked_sum(x.len(), |i| x[i])
}

pub(crate) fn asum<T: Scalar>(x: &[T]) -> T {
    chunked_sum(x.len(), |i| x[i].magnitude())
}

/// Index and magnitude of the first element of largest magnitude.
pub(crate) fn amax<T: Scalar>(x: &[T]) -> (usize, T) {
    let better = |a: (usize, T), b: (usize, T)| {
        if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
            b
        } else {
            a
        }
    };
    x.par_chunks(REDUCE_CHUNK)
        .enumerate()
        .map(|(chunk, values)| {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (chunk * REDUCE_CHUNK + i, v.magnitude()))
                .fold((0, T::zero()), |a, b| better(a, b))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold((0, T::zero()), better)
}

/// out[perm[i]] = src[i]
pub(crate) fn scatter<T: Scalar>(out: &mut [T], src: &[T], perm: &[i32]) {
    for (&p, &value) in perm.iter().zip(src) {
        out[p as usize] = value;
    }
}

/// out[i] = src[perm[i]]
pub(crate) fn gather<T: Scalar>(out: &mut [T], src: &[T], perm: &[i32]) {
    out.par_iter_mut()
        .zip(perm.par_iter())
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(o, &p)| *o = src[p as usize]);
}

/// Whether every entry of `perm` indexes into an array of length `bound`.
pub(crate) fn indices_in_bounds(perm: &[i32], bound: usize) -> bool {
    perm.par_iter()
        .with_min_len(MIN_PAR_LEN)
        .all(|&p| p >= 0 && (p as usize) < bound)
}

/// y = A*x, or y += alpha*A*x when `add` is set.
pub(crate) fn csr_mv<T: Scalar>(
    row_ptr: &[i32],
    col: &[i32],
    val: &[T],
    x: &[T],
    y: &mut [T],
    alpha: T,
    add: bool,
) {
    y.par_iter_mut()
        .enumerate()
        .with_min_len(MIN_PAR_LEN / 8)
        .for_each(|(row, yi)| {
            let (start, end) = (row_ptr[row] as usize, row_ptr[row + 1] as usize);
            let acc = (start..end).fold(T::zero(), |acc, k| acc.plus(val[k].times(x[col[k] as usize])));
            *yi = if add { yi.plus(alpha.times(acc)) } else { acc };
        });
}

pub(crate) fn dense_mv<T: Scalar>(
    val: &[T],
    cols: usize,
    x: &[T],
    y: &mut [T],
    alpha: T,
    add: bool,
) {
    y.par_iter_mut()
        .enumerate()
        .with_min_len(64)
        .for_each(|(row, yi)| {
            let acc = dot_seq(&val[row * cols..(row + 1) * cols], x);
            *yi = if add { yi.plus(alpha.times(acc)) } else { acc };
        });
}

fn dot_seq<T: Scalar>(a: &[T], b: &[T]) -> T {
    a.iter().zip(b).fold(T::zero(), |acc, (&u, &v)| acc.plus(u.times(v)))
}

/// Five-point Laplacian on a `size` x `size` grid with Dirichlet boundary.
pub(crate) fn laplace2d_mv<T: Scalar>(size: usize, x: &[T], y: &mut [T], alpha: T, add: bool) {
    let four = T::from(4).unwrap_or_else(T::zero);
    y.par_iter_mut()
        .enumerate()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(row, yi)| {
            let (iy, ix) = (row / size, row % size);
            let mut acc = four.times(x[row]);
            if ix > 0 {
                acc = acc.minus(x[row - 1]);
            }
            if ix + 1 < size {
                acc = acc.minus(x[row + 1]);
            }
            if iy > 0 {
                acc = acc.minus(x[row - size]);
            }
            if iy + 1 < size {
                acc = acc.minus(x[row + size]);
            }
            *yi = if add { yi.plus(alpha.times(acc)) } else { acc };
        });
}

/// Diagonal of a CSR matrix; missing diagonal entries read as zero.
pub(crate) fn csr_diag<T: Scalar>(row_ptr: &[i32], col: &[i32], val: &[T], out: &mut [T]) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(row, d)| {
            let (start, end) = (row_ptr[row] as usize, row_ptr[row + 1] as usize);
            *d = (start..end)
                .find(|&k| col[k] as usize == row)
                .map(|k| val[k])
                .unwrap_or_else(T::zero);
        });
}

pub(crate) fn dense_diag<T: Scalar>(val: &[T], cols: usize, out: &mut [T]) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|(i, d)| *d = val[i * cols + i]);
}

/// Replaces every entry by its reciprocal. Returns false if a zero was found.
pub(crate) fn invert<T: Scalar>(out: &mut [T]) -> bool {
    if out.par_iter().any(|v| v.is_zero()) {
        return false;
    }
    out.par_iter_mut()
        .with_min_len(MIN_PAR_LEN)
        .for_each(|v| *v = T::one() / *v);
    true
}
