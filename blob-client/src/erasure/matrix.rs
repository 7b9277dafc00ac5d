//! Dense GF(2^8) matrices: Vandermonde generator construction and
//! Gauss-Jordan inversion, the linear algebra underneath the systematic
//! Reed-Solomon code in [`super::encode_parity`]/[`super::decode_data`].

use super::gf256;

#[derive(Debug, Clone)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl Matrix {
    pub fn zero(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0u8; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zero(n, n);
        for i in 0..n {
            m.set(i, i, 1);
        }
        m
    }

    /// `rows x cols` Vandermonde matrix over `cols` nonzero, pairwise
    /// distinct x-values `1, 2, ..., rows`: `M[r][c] = x_r ^ c`. Any square
    /// submatrix of a Vandermonde matrix built this way is invertible,
    /// which is what lets the systematic generator recover data from any
    /// `k` of its `k+m` rows.
    pub fn vandermonde(rows: usize, cols: usize) -> Self {
        let mut m = Self::zero(rows, cols);
        for r in 0..rows {
            let x = (r + 1) as u8;
            for c in 0..cols {
                m.set(r, c, gf256::pow(x, c as u32));
            }
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, r: usize, c: usize) -> u8 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: u8) {
        self.data[r * self.cols + c] = v;
    }

    /// The submatrix formed by keeping only `row_indices`, in order.
    pub fn select_rows(&self, row_indices: &[usize]) -> Self {
        let mut m = Self::zero(row_indices.len(), self.cols);
        for (out_r, &r) in row_indices.iter().enumerate() {
            for c in 0..self.cols {
                m.set(out_r, c, self.get(r, c));
            }
        }
        m
    }

    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "matrix dimension mismatch");
        let mut out = Matrix::zero(self.rows, other.cols);
        for r in 0..self.rows {
            for c in 0..other.cols {
                let mut acc = 0u8;
                for k in 0..self.cols {
                    acc = gf256::add(acc, gf256::mul(self.get(r, k), other.get(k, c)));
                }
                out.set(r, c, acc);
            }
        }
        out
    }

    /// Gauss-Jordan inversion over GF(2^8). Returns `None` if the matrix is
    /// singular.
    pub fn invert(&self) -> Option<Matrix> {
        assert_eq!(self.rows, self.cols, "only square matrices can be inverted");
        let n = self.rows;
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot_row = (col..n).find(|&r| a.get(r, col) != 0)?;
            if pivot_row != col {
                a.swap_rows(col, pivot_row);
                inv.swap_rows(col, pivot_row);
            }
            let pivot_inv = gf256::inv(a.get(col, col));
            a.scale_row(col, pivot_inv);
            inv.scale_row(col, pivot_inv);
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a.get(r, col);
                if factor == 0 {
                    continue;
                }
                a.eliminate_row(r, col, factor);
                inv.eliminate_row(r, col, factor);
            }
        }
        Some(inv)
    }

    fn swap_rows(&mut self, r1: usize, r2: usize) {
        for c in 0..self.cols {
            let tmp = self.get(r1, c);
            self.set(r1, c, self.get(r2, c));
            self.set(r2, c, tmp);
        }
    }

    fn scale_row(&mut self, r: usize, factor: u8) {
        for c in 0..self.cols {
            let v = gf256::mul(self.get(r, c), factor);
            self.set(r, c, v);
        }
    }

    /// `row r -= factor * row pivot` (GF(2^8) subtraction is XOR, same as addition).
    fn eliminate_row(&mut self, r: usize, pivot: usize, factor: u8) {
        for c in 0..self.cols {
            let v = gf256::mul(self.get(pivot, c), factor);
            let new_v = gf256::add(self.get(r, c), v);
            self.set(r, c, new_v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vandermonde_top_submatrix_inverts() {
        let v = Matrix::vandermonde(6, 4);
        let top = v.select_rows(&[0, 1, 2, 3]);
        let inv = top.invert().expect("vandermonde submatrix must be invertible");
        let product = top.mul(&inv);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(product.get(r, c), if r == c { 1 } else { 0 });
            }
        }
    }

    #[test]
    fn arbitrary_square_submatrix_of_vandermonde_inverts() {
        // Picks rows {1, 3, 4, 5} of a 6x4 Vandermonde matrix -- the same
        // shape as decoding k=4 data shards from a non-systematic subset of
        // available fragments.
        let v = Matrix::vandermonde(6, 4);
        let chosen = v.select_rows(&[1, 3, 4, 5]);
        let inv = chosen.invert().expect("any k rows of a Vandermonde matrix span an invertible submatrix");
        let product = chosen.mul(&inv);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(product.get(r, c), if r == c { 1 } else { 0 });
            }
        }
    }

    #[test]
    fn identity_times_identity_is_identity() {
        let id = Matrix::identity(3);
        let product = id.mul(&id);
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(product.get(r, c), if r == c { 1 } else { 0 });
            }
        }
    }
}
