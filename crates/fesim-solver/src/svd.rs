//! Rotation-variant SVD and symmetric eigenvalue clamping.
//!
//! The material model needs F = U·Σ·Vᵗ with U and V proper rotations
//! (det = +1); a reflection is folded into the last singular value, so an
//! inverted element shows up as σ₃ < 0 instead of a flipped basis. This is
//! the decomposition the closed-form Neo-Hookean derivatives are written
//! against.

use nalgebra::{Matrix2, Matrix3, SymmetricEigen, Vector3};

/// SVD of a 3×3 matrix with rotation factors and a signed last singular value.
#[derive(Debug, Clone, Copy)]
pub struct RotationSvd {
    pub u: Matrix3<f64>,
    /// Singular values, descending by magnitude; σ₃ carries the sign of det F
    pub sigma: Vector3<f64>,
    pub v: Matrix3<f64>,
}

impl RotationSvd {
    /// Decompose `f`, folding reflections into σ₃.
    pub fn new(f: &Matrix3<f64>) -> Result<Self, String> {
        let svd = f.svd(true, true);
        let mut u = svd.u.ok_or("SVD did not produce U")?;
        let mut v = svd.v_t.ok_or("SVD did not produce Vᵗ")?.transpose();
        let mut sigma = svd.singular_values;

        if u.determinant() < 0.0 {
            negate_column(&mut u, 2);
            sigma[2] = -sigma[2];
        }
        if v.determinant() < 0.0 {
            negate_column(&mut v, 2);
            sigma[2] = -sigma[2];
        }

        Ok(Self { u, sigma, v })
    }

    /// det F = σ₁·σ₂·σ₃.
    pub fn determinant(&self) -> f64 {
        self.sigma.x * self.sigma.y * self.sigma.z
    }

    /// Rebuild U·Σ·Vᵗ (used by tests).
    pub fn recompose(&self) -> Matrix3<f64> {
        self.u * Matrix3::from_diagonal(&self.sigma) * self.v.transpose()
    }
}

fn negate_column(m: &mut Matrix3<f64>, col: usize) {
    for row in 0..3 {
        m[(row, col)] = -m[(row, col)];
    }
}

/// Clamp a symmetric 3×3 matrix to its nearest positive-semidefinite matrix.
pub fn make_psd3(m: &mut Matrix3<f64>) {
    let eigen = SymmetricEigen::new(*m);
    if eigen.eigenvalues.iter().all(|&l| l >= 0.0) {
        return;
    }
    let clamped = eigen.eigenvalues.map(|l| l.max(0.0));
    *m = eigen.eigenvectors * Matrix3::from_diagonal(&clamped) * eigen.eigenvectors.transpose();
}

/// Clamp a symmetric 2×2 matrix to its nearest positive-semidefinite matrix.
pub fn make_psd2(m: &mut Matrix2<f64>) {
    let eigen = SymmetricEigen::new(*m);
    if eigen.eigenvalues.iter().all(|&l| l >= 0.0) {
        return;
    }
    let clamped = eigen.eigenvalues.map(|l| l.max(0.0));
    *m = eigen.eigenvectors * Matrix2::from_diagonal(&clamped) * eigen.eigenvectors.transpose();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recomposes_a_plain_stretch() {
        let f = Matrix3::new(2.0, 0.0, 0.0, 0.0, 1.5, 0.0, 0.0, 0.0, 0.5);
        let svd = RotationSvd::new(&f).unwrap();
        assert!((svd.recompose() - f).norm() < 1e-12);
        assert!(svd.u.determinant() > 0.0 && svd.v.determinant() > 0.0);
        assert!((svd.determinant() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn inversion_shows_up_as_negative_sigma3() {
        // Reflection across x: det F = -1
        let f = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let svd = RotationSvd::new(&f).unwrap();
        assert!(svd.determinant() < 0.0);
        assert!(svd.sigma[2] < 0.0, "sign must be carried by the last σ");
        assert!(svd.u.determinant() > 0.999 && svd.v.determinant() > 0.999);
        assert!((svd.recompose() - f).norm() < 1e-12);
    }

    #[test]
    fn psd_projection_clamps_negative_eigenvalues() {
        let mut m = Matrix3::new(1.0, 0.0, 0.0, 0.0, -2.0, 0.0, 0.0, 0.0, 3.0);
        make_psd3(&mut m);
        let eigen = SymmetricEigen::new(m);
        for &l in eigen.eigenvalues.iter() {
            assert!(l >= -1e-12, "eigenvalue {l} not clamped");
        }
        // Positive part untouched
        assert!((m[(2, 2)] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn psd_projection_leaves_spd_input_alone() {
        let m0 = Matrix2::new(2.0, 0.5, 0.5, 1.0);
        let mut m = m0;
        make_psd2(&mut m);
        assert_eq!(m, m0);
    }
}
