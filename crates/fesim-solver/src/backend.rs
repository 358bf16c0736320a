//! Linear-solve backends for the reduced Newton system.
//!
//! The system matrix is symmetric and, with SPD projection enabled,
//! positive definite up to roundoff, so sparse Cholesky is the default.
//! When a factorization fails the backend retries with a small diagonal
//! shift before giving up, since a shifted step still decreases the
//! incremental energy and the line search absorbs the inexactness.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};

/// Relative diagonal shifts tried in order; 0.0 is the unshifted attempt.
const SHIFT_SCHEDULE: [f64; 4] = [0.0, 1e-8, 1e-6, 1e-4];

/// What the backend actually did to produce the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveInfo {
    /// 1-based attempt count over the shift schedule
    pub attempts: usize,
    /// Absolute diagonal shift of the successful attempt
    pub shift: f64,
}

/// A direct solver for one reduced system A·x = b.
pub trait ReducedSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, system: &CsrMatrix<f64>, rhs: &DVector<f64>) -> Result<(DVector<f64>, SolveInfo), String>;
}

/// Sparse Cholesky with a diagonal-shift retry schedule.
#[derive(Debug, Default)]
pub struct SparseCholeskyBackend;

impl SparseCholeskyBackend {
    pub fn new() -> Self {
        Self
    }

    fn to_shifted_csc(system: &CsrMatrix<f64>, shift: f64) -> CscMatrix<f64> {
        let n = system.nrows();
        let mut coo = CooMatrix::new(n, n);
        for (row, col, value) in system.triplet_iter() {
            coo.push(row, col, *value);
        }
        if shift > 0.0 {
            for i in 0..n {
                coo.push(i, i, shift);
            }
        }
        CscMatrix::from(&coo)
    }

    fn max_abs_diagonal(system: &CsrMatrix<f64>) -> f64 {
        let mut max = 0.0_f64;
        for (row, col, value) in system.triplet_iter() {
            if row == col {
                max = max.max(value.abs());
            }
        }
        max
    }
}

impl ReducedSolver for SparseCholeskyBackend {
    fn name(&self) -> &'static str {
        "sparse-cholesky"
    }

    fn solve(
        &self,
        system: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveInfo), String> {
        let n = system.nrows();
        if system.ncols() != n {
            return Err(format!(
                "system matrix must be square (got {n}x{})",
                system.ncols()
            ));
        }
        if rhs.len() != n {
            return Err(format!(
                "right-hand side length {} does not match system size {n}",
                rhs.len()
            ));
        }
        if n == 0 {
            return Ok((DVector::zeros(0), SolveInfo { attempts: 1, shift: 0.0 }));
        }

        let diag_scale = Self::max_abs_diagonal(system);
        let b = DMatrix::from_column_slice(n, 1, rhs.as_slice());

        for (attempt, tau) in SHIFT_SCHEDULE.iter().enumerate() {
            let shift = tau * diag_scale;
            let csc = Self::to_shifted_csc(system, shift);
            if let Ok(chol) = nalgebra_sparse::factorization::CscCholesky::factor(&csc) {
                // One-column DMatrix, so its flat storage is the solution
                let solution = chol.solve(&b);
                let x = DVector::from_column_slice(solution.as_slice());
                return Ok((
                    x,
                    SolveInfo {
                        attempts: attempt + 1,
                        shift,
                    },
                ));
            }
        }
        Err(format!(
            "sparse Cholesky failed after {} shifted attempts (max shift {:.3e})",
            SHIFT_SCHEDULE.len(),
            SHIFT_SCHEDULE[SHIFT_SCHEDULE.len() - 1] * diag_scale
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr_from_dense(dense: &DMatrix<f64>) -> CsrMatrix<f64> {
        let n = dense.nrows();
        let mut coo = CooMatrix::new(n, n);
        for r in 0..n {
            for c in 0..n {
                if dense[(r, c)] != 0.0 {
                    coo.push(r, c, dense[(r, c)]);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn solves_a_small_spd_system() {
        let dense = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let system = csr_from_dense(&dense);
        let x_true = DVector::from_vec(vec![1.0, -2.0, 3.0]);
        let rhs = &dense * &x_true;

        let backend = SparseCholeskyBackend::new();
        let (x, info) = backend.solve(&system, &rhs).unwrap();
        assert_eq!(info.attempts, 1);
        assert_eq!(info.shift, 0.0);
        assert!((x - x_true).amax() < 1e-10);
    }

    #[test]
    fn empty_system_yields_empty_solution() {
        let system = CsrMatrix::try_from_csr_data(0, 0, vec![0], vec![], vec![]).unwrap();
        let backend = SparseCholeskyBackend::new();
        let (x, _) = backend.solve(&system, &DVector::zeros(0)).unwrap();
        assert_eq!(x.len(), 0);
    }

    #[test]
    fn rejects_mismatched_rhs() {
        let dense = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let system = csr_from_dense(&dense);
        let backend = SparseCholeskyBackend::new();
        assert!(backend.solve(&system, &DVector::zeros(3)).is_err());
    }
}
