use crate::dense_matrix::DenseMatrix;
use crate::error::CoreError;
use crate::scalar::Scalar;
use crate::traits::Dimensions;

/// Sparse matrix in Compressed Sparse Row (CSR) format on the host.
///
/// Column indices inside a row are kept sorted; assembled matrices never
/// carry duplicate entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T: Scalar> {
    rows: usize,
    cols: usize,
    /// Non-zero values, row by row.
    pub(crate) values: Vec<T>,
    /// Column index of each value.
    pub(crate) col_indices: Vec<usize>,
    /// `rows + 1` offsets into `values`; `row_ptr[rows] == nnz`.
    pub(crate) row_ptr: Vec<usize>,
}

/// One `(row, col, value)` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet<T> {
    pub row: usize,
    pub col: usize,
    pub value: T,
}

impl<T> Triplet<T> {
    pub fn new(row: usize, col: usize, value: T) -> Self {
        Triplet { row, col, value }
    }
}

impl<T: Scalar> CsrMatrix<T> {
    /// Creates an empty matrix (no non-zeros) with the given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        CsrMatrix {
            rows,
            cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0; rows + 1],
        }
    }

    /// Assembles a matrix from unordered triplets. Entries sharing a
    /// position are summed.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: &[Triplet<T>],
    ) -> Result<Self, CoreError> {
        if let Some(t) = triplets.iter().find(|t| t.row >= rows || t.col >= cols) {
            return Err(CoreError::InvalidDimensions(format!(
                "Triplet ({}, {}) out of bounds for a {}x{} matrix",
                t.row, t.col, rows, cols
            )));
        }
        let mut coords = triplets.to_vec();
        coords.sort_unstable_by_key(|t| (t.row, t.col));

        let mut values: Vec<T> = Vec::with_capacity(coords.len());
        let mut col_indices: Vec<usize> = Vec::with_capacity(coords.len());
        let mut row_ptr = vec![0usize; rows + 1];
        let mut last: Option<(usize, usize)> = None;
        for t in &coords {
            if last == Some((t.row, t.col)) {
                if let Some(v) = values.last_mut() {
                    *v = *v + t.value;
                }
                continue;
            }
            values.push(t.value);
            col_indices.push(t.col);
            row_ptr[t.row + 1] += 1;
            last = Some((t.row, t.col));
        }
        // Counts to cumulative offsets
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        Ok(CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Creates a matrix from CSR components after validating them.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<T>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    ) -> Result<Self, CoreError> {
        if row_ptr.len() != rows + 1 {
            return Err(CoreError::InvalidDimensions(
                "row_ptr length must be rows + 1".to_string(),
            ));
        }
        if values.len() != col_indices.len() {
            return Err(CoreError::InvalidDimensions(
                "values and col_indices must have the same length".to_string(),
            ));
        }
        if row_ptr.first() != Some(&0) || row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(CoreError::InvalidDimensions(
                "row_ptr must start at 0 and be non-decreasing".to_string(),
            ));
        }
        if row_ptr.last() != Some(&values.len()) {
            return Err(CoreError::InvalidDimensions(
                "Last element of row_ptr must equal the number of non-zero values".to_string(),
            ));
        }
        if col_indices.iter().any(|&c| c >= cols) {
            return Err(CoreError::InvalidDimensions(
                "Column index out of bounds".to_string(),
            ));
        }
        // i32 is the device index type
        if values.len() > i32::MAX as usize || rows >= i32::MAX as usize {
            return Err(CoreError::InvalidDimensions(
                "Matrix too large for 32-bit indices".to_string(),
            ));
        }

        let mut matrix = CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        };
        matrix.sort_rows();
        Ok(matrix)
    }

    /// Keeps the non-zero entries of a row-major dense array.
    pub fn from_dense(dense: &DenseMatrix<T>) -> Self {
        let (rows, cols) = dense.dims();
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = Vec::with_capacity(rows + 1);
        row_ptr.push(0);
        for r in 0..rows {
            for (c, &v) in dense.data()[r * cols..(r + 1) * cols].iter().enumerate() {
                if !v.is_zero() {
                    values.push(v);
                    col_indices.push(c);
                }
            }
            row_ptr.push(values.len());
        }
        CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        }
    }

    fn sort_rows(&mut self) {
        for r in 0..self.rows {
            let range = self.row_ptr[r]..self.row_ptr[r + 1];
            let cols = &self.col_indices[range.clone()];
            if cols.windows(2).all(|w| w[0] <= w[1]) {
                continue;
            }
            let mut entries: Vec<(usize, T)> = cols
                .iter()
                .copied()
                .zip(self.values[range.clone()].iter().copied())
                .collect();
            entries.sort_by_key(|&(c, _)| c);
            for (k, (c, v)) in range.zip(entries) {
                self.col_indices[k] = c;
                self.values[k] = v;
            }
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Value at `(row, col)`; `None` for structural zeros and out-of-bounds positions.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        self.col_indices[range.clone()]
            .binary_search(&col)
            .ok()
            .map(|k| self.values[range.start + k])
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn iter(&self) -> CsrIter<'_, T> {
        CsrIter {
            matrix: self,
            row: 0,
            pos: 0,
        }
    }

    pub fn transpose(&self) -> Self {
        let mut row_ptr = vec![0usize; self.cols + 1];
        for &c in &self.col_indices {
            row_ptr[c + 1] += 1;
        }
        for i in 1..=self.cols {
            row_ptr[i] += row_ptr[i - 1];
        }
        let mut next = row_ptr.clone();
        let mut values = vec![T::zero(); self.nnz()];
        let mut col_indices = vec![0usize; self.nnz()];
        // Walking rows in order keeps every transposed row sorted.
        for t in self.iter() {
            let pos = next[t.col];
            values[pos] = t.value;
            col_indices[pos] = t.row;
            next[t.col] += 1;
        }
        CsrMatrix {
            rows: self.cols,
            cols: self.rows,
            values,
            col_indices,
            row_ptr,
        }
    }

    /// Sparse product `self * other`.
    pub fn multiply(&self, other: &CsrMatrix<T>) -> Result<Self, CoreError> {
        if self.cols != other.rows {
            return Err(CoreError::InvalidDimensions(format!(
                "Cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = Vec::with_capacity(self.rows + 1);
        row_ptr.push(0);

        // Dense accumulator for one output row
        let mut acc = vec![T::zero(); other.cols];
        let mut marker = vec![usize::MAX; other.cols];
        let mut touched: Vec<usize> = Vec::new();
        for r in 0..self.rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let (a_col, a_val) = (self.col_indices[k], self.values[k]);
                for j in other.row_ptr[a_col]..other.row_ptr[a_col + 1] {
                    let c = other.col_indices[j];
                    if marker[c] != r {
                        marker[c] = r;
                        acc[c] = T::zero();
                        touched.push(c);
                    }
                    acc[c] = acc[c] + a_val * other.values[j];
                }
            }
            touched.sort_unstable();
            for &c in &touched {
                values.push(acc[c]);
                col_indices.push(c);
            }
            touched.clear();
            row_ptr.push(values.len());
        }

        Ok(CsrMatrix {
            rows: self.rows,
            cols: other.cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Main diagonal; missing entries are zero.
    pub fn diagonal(&self) -> Vec<T> {
        (0..self.rows.min(self.cols))
            .map(|i| self.get(i, i).unwrap_or_else(T::zero))
            .collect()
    }

    /// Gershgorin bounds `(lambda_min, lambda_max)` of the spectrum.
    pub fn gershgorin(&self) -> (T, T) {
        let mut bounds: Option<(T, T)> = None;
        for r in 0..self.rows {
            let mut centre = T::zero();
            let mut radius = T::zero();
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                if self.col_indices[k] == r {
                    centre = self.values[k];
                } else {
                    radius = radius + self.values[k].magnitude();
                }
            }
            let (lo, hi) = (centre - radius, centre + radius);
            bounds = Some(match bounds {
                None => (lo, hi),
                Some((min, max)) => (
                    if lo < min { lo } else { min },
                    if hi > max { hi } else { max },
                ),
            });
        }
        bounds.unwrap_or((T::zero(), T::zero()))
    }

    /// Returns `self + alpha * I`, inserting missing diagonal entries.
    pub fn add_scalar_diagonal(&self, alpha: T) -> Self {
        let mut triplets: Vec<Triplet<T>> = self.iter().collect();
        triplets.extend((0..self.rows.min(self.cols)).map(|i| Triplet::new(i, i, alpha)));
        // Positions come from a valid matrix
        CsrMatrix::from_triplets(self.rows, self.cols, &triplets).unwrap_or_else(|_| self.clone())
    }

    pub fn to_dense(&self) -> DenseMatrix<T> {
        let mut dense = DenseMatrix::zeros(self.rows, self.cols);
        for t in self.iter() {
            if let Some(v) = dense.get_mut(t.row, t.col) {
                *v = t.value;
            }
        }
        dense
    }

    /// Row pointers and column indices in the device index type.
    pub(crate) fn device_structure(&self) -> (Vec<i32>, Vec<i32>) {
        let limit = i32::MAX as usize;
        require!(
            self.nnz() <= limit && self.rows <= limit && self.cols <= limit,
            "CSR matrix {}x{} with {} nonzeros exceeds the i32 index range",
            self.rows,
            self.cols,
            self.nnz()
        );
        (
            self.row_ptr.iter().map(|&p| p as i32).collect(),
            self.col_indices.iter().map(|&c| c as i32).collect(),
        )
    }

    pub(crate) fn from_device_structure(
        rows: usize,
        cols: usize,
        row_ptr: &[i32],
        col: &[i32],
        values: Vec<T>,
    ) -> Self {
        CsrMatrix {
            rows,
            cols,
            values,
            col_indices: col.iter().map(|&c| c as usize).collect(),
            row_ptr: row_ptr.iter().map(|&p| p as usize).collect(),
        }
    }
}

pub struct CsrIter<'a, T: Scalar> {
    matrix: &'a CsrMatrix<T>,
    row: usize,
    pos: usize,
}

impl<T: Scalar> Iterator for CsrIter<'_, T> {
    type Item = Triplet<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.matrix;
        while self.row < m.rows && self.pos >= m.row_ptr[self.row + 1] {
            self.row += 1;
        }
        if self.row >= m.rows {
            return None;
        }
        let k = self.pos;
        self.pos += 1;
        Some(Triplet::new(self.row, m.col_indices[k], m.values[k]))
    }
}

impl<T: Scalar> Dimensions for CsrMatrix<T> {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}
