//! Dense square matrices and the matrix exponential.
//!
//! Sized for the small state spaces of colonization models (2 or 3 states),
//! so everything is a plain row-major `Vec<f64>`.
//!
//! The exponential uses scaling and squaring with a diagonal Padé
//! approximant (Golub & Van Loan, Algorithm 11.3.1).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Degree of the diagonal Padé approximant used by [`SquareMatrix::expm`].
const PADE_DEGREE: usize = 6;

/// Smallest pivot magnitude accepted by the linear solver.
const PIVOT_EPS: f64 = 1e-300;

/// Errors raised by matrix operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("matrix is singular (pivot {pivot:e} in column {column})")]
    Singular { column: usize, pivot: f64 },

    #[error("matrix contains a non-finite entry at ({row}, {col})")]
    NonFinite { row: usize, col: usize },
}

/// Row-major dense `n × n` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SquareMatrix {
    /// All-zero matrix.
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// Identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Build from explicit rows; every row must have `rows.len()` entries.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for row in rows {
            if row.len() != n {
                return Err(MatrixError::DimensionMismatch {
                    expected: n,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self { n, data })
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] = value;
    }

    /// Borrow one row.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.n..(row + 1) * self.n]
    }

    /// Sum of the entries of one row.
    pub fn row_sum(&self, row: usize) -> f64 {
        self.row(row).iter().sum()
    }

    /// First non-finite entry, if any.
    pub fn check_finite(&self) -> Result<(), MatrixError> {
        match self.data.iter().position(|v| !v.is_finite()) {
            Some(idx) => Err(MatrixError::NonFinite {
                row: idx / self.n,
                col: idx % self.n,
            }),
            None => Ok(()),
        }
    }

    /// Multiply every entry by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            n: self.n,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    /// `self + factor * other`.
    pub fn add_scaled(&self, other: &Self, factor: f64) -> Result<Self, MatrixError> {
        self.check_dim(other)?;
        Ok(Self {
            n: self.n,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a + factor * b)
                .collect(),
        })
    }

    /// Matrix product `self * other`.
    pub fn mul(&self, other: &Self) -> Result<Self, MatrixError> {
        self.check_dim(other)?;
        let n = self.n;
        let mut out = Self::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self.data[i * n + k];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out.data[i * n + j] += a * other.data[k * n + j];
                }
            }
        }
        Ok(out)
    }

    /// Integer power by repeated squaring.
    pub fn pow(&self, mut exp: u32) -> Self {
        let mut result = Self::identity(self.n);
        let mut base = self.clone();
        while exp > 0 {
            if exp & 1 == 1 {
                result = result.mul_unchecked(&base);
            }
            base = base.mul_unchecked(&base);
            exp >>= 1;
        }
        result
    }

    /// Infinity norm (maximum absolute row sum).
    pub fn norm_inf(&self) -> f64 {
        (0..self.n)
            .map(|i| self.row(i).iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Solve `self * X = rhs` by Gaussian elimination with partial pivoting.
    pub fn solve(&self, rhs: &Self) -> Result<Self, MatrixError> {
        self.check_dim(rhs)?;
        let n = self.n;
        let mut a = self.data.clone();
        let mut b = rhs.data.clone();

        for col in 0..n {
            let (pivot_row, pivot) = (col..n)
                .map(|r| (r, a[r * n + col]))
                .fold((col, 0.0f64), |best, (r, v)| {
                    if v.abs() > best.1.abs() {
                        (r, v)
                    } else {
                        best
                    }
                });
            if pivot.abs() < PIVOT_EPS {
                return Err(MatrixError::Singular { column: col, pivot });
            }
            if pivot_row != col {
                for j in 0..n {
                    a.swap(col * n + j, pivot_row * n + j);
                    b.swap(col * n + j, pivot_row * n + j);
                }
            }
            for r in (col + 1)..n {
                let factor = a[r * n + col] / pivot;
                if factor == 0.0 {
                    continue;
                }
                for j in col..n {
                    a[r * n + j] -= factor * a[col * n + j];
                }
                for j in 0..n {
                    b[r * n + j] -= factor * b[col * n + j];
                }
            }
        }

        for col in (0..n).rev() {
            let pivot = a[col * n + col];
            for j in 0..n {
                let mut acc = b[col * n + j];
                for k in (col + 1)..n {
                    acc -= a[col * n + k] * b[k * n + j];
                }
                b[col * n + j] = acc / pivot;
            }
        }

        Ok(Self { n, data: b })
    }

    /// Matrix exponential `exp(self * t)`.
    ///
    /// For a CTMC generator this is the transition probability matrix over a
    /// duration `t`. Tiny negative round-off in the result is clamped to zero.
    pub fn expm(&self, t: f64) -> Result<Self, MatrixError> {
        let a = self.scaled(t);
        a.check_finite()?;
        let n = self.n;

        let norm = a.norm_inf();
        let squarings = if norm > 0.0 {
            (norm.log2().floor() as i32 + 1).max(0) as u32
        } else {
            0
        };
        let a = a.scaled(1.0 / 2f64.powi(squarings as i32));

        let identity = Self::identity(n);
        let mut c = 0.5;
        let mut x = a.clone();
        let mut numer = identity.add_scaled(&a, c)?;
        let mut denom = identity.add_scaled(&a, -c)?;
        let mut positive = true;
        let q = PADE_DEGREE as f64;
        for k in 2..=PADE_DEGREE {
            let kf = k as f64;
            c *= (q - kf + 1.0) / (kf * (2.0 * q - kf + 1.0));
            x = a.mul_unchecked(&x);
            numer = numer.add_scaled(&x, c)?;
            denom = denom.add_scaled(&x, if positive { c } else { -c })?;
            positive = !positive;
        }

        let mut f = denom.solve(&numer)?;
        for _ in 0..squarings {
            f = f.mul_unchecked(&f);
        }
        for v in f.data.iter_mut() {
            if *v < 0.0 && *v > -1e-9 {
                *v = 0.0;
            }
        }
        f.check_finite()?;
        Ok(f)
    }

    fn mul_unchecked(&self, other: &Self) -> Self {
        // Callers guarantee equal dimensions.
        match self.mul(other) {
            Ok(m) => m,
            Err(_) => Self::zeros(self.n),
        }
    }

    fn check_dim(&self, other: &Self) -> Result<(), MatrixError> {
        if self.n != other.n {
            return Err(MatrixError::DimensionMismatch {
                expected: self.n,
                actual: other.n,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn expm_of_zero_is_identity() {
        let z = SquareMatrix::zeros(3);
        assert_eq!(z.expm(5.0).unwrap(), SquareMatrix::identity(3));
    }

    #[test]
    fn expm_two_state_closed_form() {
        // Q = [[-a, a], [b, -b]]: P00(t) = b/(a+b) + a/(a+b) e^{-(a+b)t}.
        let (a, b, t) = (0.3, 0.7, 2.5);
        let q = SquareMatrix::from_rows(&[vec![-a, a], vec![b, -b]]).unwrap();
        let p = q.expm(t).unwrap();
        let expected = b / (a + b) + a / (a + b) * (-(a + b) * t).exp();
        assert!(approx_eq(p.get(0, 0), expected, 1e-12));
        assert!(approx_eq(p.row_sum(0), 1.0, 1e-12));
        assert!(approx_eq(p.row_sum(1), 1.0, 1e-12));
    }

    #[test]
    fn expm_absorbing_state() {
        let q = SquareMatrix::from_rows(&[vec![-0.1, 0.1], vec![0.0, 0.0]]).unwrap();
        let p = q.expm(5.0).unwrap();
        assert!(approx_eq(p.get(0, 0), (-0.5f64).exp(), 1e-12));
        assert!(approx_eq(p.get(1, 1), 1.0, 1e-12));
        assert_eq!(p.get(1, 0), 0.0);
    }

    #[test]
    fn expm_large_norm_uses_squaring() {
        let q = SquareMatrix::from_rows(&[
            vec![-40.0, 40.0, 0.0],
            vec![0.0, -25.0, 25.0],
            vec![10.0, 0.0, -10.0],
        ])
        .unwrap();
        let p = q.expm(3.0).unwrap();
        for i in 0..3 {
            assert!(approx_eq(p.row_sum(i), 1.0, 1e-9));
            assert!(p.row(i).iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn solve_recovers_identity() {
        let a = SquareMatrix::from_rows(&[vec![2.0, 1.0], vec![1.0, 3.0]]).unwrap();
        let inv = a.solve(&SquareMatrix::identity(2)).unwrap();
        let prod = a.mul(&inv).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(approx_eq(prod.get(i, j), expected, 1e-12));
            }
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let a = SquareMatrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
        assert!(matches!(
            a.solve(&SquareMatrix::identity(2)),
            Err(MatrixError::Singular { .. })
        ));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = SquareMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            MatrixError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn pow_matches_repeated_mul() {
        let a = SquareMatrix::from_rows(&[vec![0.5, 0.5], vec![0.2, 0.8]]).unwrap();
        let cubed = a.mul(&a).unwrap().mul(&a).unwrap();
        let p = a.pow(3);
        for i in 0..2 {
            for j in 0..2 {
                assert!(approx_eq(p.get(i, j), cubed.get(i, j), 1e-15));
            }
        }
        assert_eq!(a.pow(0), SquareMatrix::identity(2));
    }

    #[test]
    fn non_finite_generator_rejected() {
        let q = SquareMatrix::from_rows(&[vec![f64::NAN, 0.0], vec![0.0, 0.0]]).unwrap();
        assert!(matches!(q.expm(1.0), Err(MatrixError::NonFinite { row: 0, col: 0 })));
    }
}
