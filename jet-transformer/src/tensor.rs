use rayon::prelude::*;

/// Dense row-major activations of shape `[batch, seq_len, dim]`.
///
/// Every `(batch, position)` pair owns one contiguous row of `dim` values,
/// which is the unit most layers operate on.
#[derive(Clone, PartialEq)]
pub struct Tensor3 {
    pub data: Vec<f32>,
    pub batch: usize,
    pub seq_len: usize,
    pub dim: usize,
}

impl Tensor3 {
    pub fn zeros(batch: usize, seq_len: usize, dim: usize) -> Self {
        Self { data: vec![0.0; batch * seq_len * dim], batch, seq_len, dim }
    }

    pub fn from_vec(data: Vec<f32>, batch: usize, seq_len: usize, dim: usize) -> Self {
        assert_eq!(data.len(), batch * seq_len * dim, "Tensor data does not match its shape");
        Self { data, batch, seq_len, dim }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.seq_len, self.dim)
    }

    pub fn row(&self, batch: usize, pos: usize) -> &[f32] {
        let start = (batch * self.seq_len + pos) * self.dim;
        &self.data[start..start + self.dim]
    }

    pub fn row_mut(&mut self, batch: usize, pos: usize) -> &mut [f32] {
        let start = (batch * self.seq_len + pos) * self.dim;
        &mut self.data[start..start + self.dim]
    }

    pub fn par_rows(&self) -> rayon::slice::ChunksExact<'_, f32> {
        self.data.par_chunks_exact(self.dim)
    }

    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksExactMut<'_, f32> {
        self.data.par_chunks_exact_mut(self.dim)
    }

    /// Applies `op` to every row of `self`, writing rows of width `out_dim`.
    pub fn map_rows<F>(&self, out_dim: usize, op: F) -> Tensor3
    where
        F: Fn(&mut [f32], &[f32]) + Sync + Send,
    {
        let mut output = Tensor3::zeros(self.batch, self.seq_len, out_dim);
        if out_dim > 0 && self.dim > 0 {
            output
                .par_rows_mut()
                .zip(self.par_rows())
                .for_each(|(out_row, in_row)| op(out_row, in_row));
        }
        output
    }

    /// Element-wise `self += other`.
    pub fn add_assign(&mut self, other: &Tensor3) {
        debug_assert_eq!(self.shape(), other.shape());
        self.data.par_iter_mut().zip(other.data.par_iter()).for_each(|(x, &delta)| *x += delta);
    }
}

impl std::fmt::Debug for Tensor3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor3")
            .field("batch", &self.batch)
            .field("seq_len", &self.seq_len)
            .field("dim", &self.dim)
            .finish()
    }
}

/// Computes `xout = W x` for a row-major weight matrix `W` of shape `[d, n]`.
pub fn matmul(xout: &mut [f32], x: &[f32], w: &[f32], n: usize, d: usize) {
    assert!(xout.len() >= d, "Output slice length must be at least d parameter: {} >= {}", xout.len(), d);
    debug_assert_eq!(x.len(), n);
    debug_assert!(w.len() >= n * d);

    xout.iter_mut().enumerate().take(d).for_each(|(i, out_val)| {
        let weight_row = &w[i * n..(i + 1) * n];
        *out_val = dot(weight_row, x);
    });
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}
