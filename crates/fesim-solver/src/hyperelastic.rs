//! Closed-form Neo-Hookean energy, stress, and stress derivative.
//!
//! Everything is evaluated in the singular-value space of the deformation
//! gradient F = U·Σ·Vᵗ and transformed back with U and V:
//!
//! - energy density Ψ(σ₁, σ₂, σ₃)
//! - first Piola–Kirchhoff stress P = U·diag(∂Ψ/∂σ)·Vᵗ
//! - the 9×9 tensor ∂P/∂F, assembled from ∂²Ψ/∂σ² and three 2×2 twist/flip
//!   blocks whose coefficients are closed-form limits of
//!   (∂Ψ/∂σᵢ ± ∂Ψ/∂σⱼ)/(σᵢ ± σⱼ); there is no direct division by σᵢ − σⱼ,
//!   so repeated singular values stay finite.
//!
//! Two variants share this interface:
//!
//! - **common**: Ψ = μ/2(‖F‖² − 3) − μ·ln J + λ/2·ln²J (J clamped positive)
//! - **stable**: Ψ = μ/2(‖F‖² − 3) − μ(J − 1) + λ/2(J − 1)² (inversion-safe)
//!
//! The per-element Hessian block can be projected to the nearest symmetric
//! positive-semidefinite matrix (eigen-clamping of the diagonal-space
//! blocks), which Newton needs under compression and inversion.

use nalgebra::{Matrix2, Matrix3, SMatrix, Vector3};

use fesim_model::MaterialVariant;

use crate::svd::{RotationSvd, make_psd2, make_psd3};

/// Floor applied to denominators before division.
pub const DENOM_EPS: f64 = 1e-8;

/// Clamp a denominator's magnitude away from zero, preserving its sign.
fn guard(x: f64) -> f64 {
    if x.abs() >= DENOM_EPS {
        x
    } else if x < 0.0 {
        -DENOM_EPS
    } else {
        DENOM_EPS
    }
}

/// Energy density Ψ(σ).
pub fn energy_density(variant: MaterialVariant, sigma: &Vector3<f64>, mu: f64, lambda: f64) -> f64 {
    let i_c = sigma.x * sigma.x + sigma.y * sigma.y + sigma.z * sigma.z;
    let j = sigma.x * sigma.y * sigma.z;
    match variant {
        MaterialVariant::Common => {
            let log_j = j.max(DENOM_EPS).ln();
            0.5 * mu * (i_c - 3.0) - mu * log_j + 0.5 * lambda * log_j * log_j
        }
        MaterialVariant::Stable => {
            let jm1 = j - 1.0;
            0.5 * mu * (i_c - 3.0) - mu * jm1 + 0.5 * lambda * jm1 * jm1
        }
    }
}

/// Gradient ∂Ψ/∂σ.
pub fn d_energy_d_sigma(
    variant: MaterialVariant,
    sigma: &Vector3<f64>,
    mu: f64,
    lambda: f64,
) -> Vector3<f64> {
    let j = sigma.x * sigma.y * sigma.z;
    match variant {
        MaterialVariant::Common => {
            let log_j = j.max(DENOM_EPS).ln();
            Vector3::from_fn(|i, _| {
                let s = guard(sigma[i]);
                mu * sigma[i] - mu / s + lambda * log_j / s
            })
        }
        MaterialVariant::Stable => {
            let jm1 = j - 1.0;
            Vector3::from_fn(|i, _| {
                // product of the other two singular values = ∂J/∂σᵢ
                let dj = j_partial(sigma, i);
                mu * sigma[i] - mu * dj + lambda * jm1 * dj
            })
        }
    }
}

/// Hessian ∂²Ψ/∂σ² (symmetric 3×3).
pub fn d2_energy_d_sigma2(
    variant: MaterialVariant,
    sigma: &Vector3<f64>,
    mu: f64,
    lambda: f64,
) -> Matrix3<f64> {
    let j = sigma.x * sigma.y * sigma.z;
    let mut h = Matrix3::zeros();
    match variant {
        MaterialVariant::Common => {
            let log_j = j.max(DENOM_EPS).ln();
            for i in 0..3 {
                let si = guard(sigma[i]);
                h[(i, i)] = mu + (mu + lambda * (1.0 - log_j)) / (si * si);
                for k in (i + 1)..3 {
                    let sk = guard(sigma[k]);
                    let off = lambda / (si * sk);
                    h[(i, k)] = off;
                    h[(k, i)] = off;
                }
            }
        }
        MaterialVariant::Stable => {
            for i in 0..3 {
                let dj = j_partial(sigma, i);
                h[(i, i)] = mu + lambda * dj * dj;
                for k in (i + 1)..3 {
                    // third index, complement of {i, k}
                    let m = 3 - i - k;
                    let sm = sigma[m];
                    let off = lambda * sm * (2.0 * j - 1.0) - mu * sm;
                    h[(i, k)] = off;
                    h[(k, i)] = off;
                }
            }
        }
    }
    h
}

/// Left coefficients of the three 2×2 twist/flip blocks.
///
/// Entry `p` is the closed-form limit of (∂Ψ/∂σᵢ − ∂Ψ/∂σⱼ)/(2(σᵢ − σⱼ)) for
/// the pair (i, j) = (p, (p+1) mod 3); evaluating the limit analytically is
/// what keeps repeated singular values finite.
pub fn b_left_coefficients(
    variant: MaterialVariant,
    sigma: &Vector3<f64>,
    mu: f64,
    lambda: f64,
) -> Vector3<f64> {
    let j = sigma.x * sigma.y * sigma.z;
    match variant {
        MaterialVariant::Common => {
            let log_j = j.max(DENOM_EPS).ln();
            Vector3::from_fn(|p, _| {
                let q = (p + 1) % 3;
                let prod = guard(sigma[p] * sigma[q]);
                0.5 * (mu + (mu - lambda * log_j) / prod)
            })
        }
        MaterialVariant::Stable => {
            let jm1 = j - 1.0;
            Vector3::from_fn(|p, _| {
                let q = (p + 1) % 3;
                let m = 3 - p - q; // third index
                0.5 * (mu + sigma[m] * (mu - lambda * jm1))
            })
        }
    }
}

/// ∂J/∂σᵢ, the product of the other two singular values.
fn j_partial(sigma: &Vector3<f64>, i: usize) -> f64 {
    match i {
        0 => sigma.y * sigma.z,
        1 => sigma.x * sigma.z,
        _ => sigma.x * sigma.y,
    }
}

/// First Piola–Kirchhoff stress P = U·diag(∂Ψ/∂σ)·Vᵗ.
pub fn first_piola_kirchhoff(
    variant: MaterialVariant,
    svd: &RotationSvd,
    mu: f64,
    lambda: f64,
) -> Matrix3<f64> {
    let dpsi = d_energy_d_sigma(variant, &svd.sigma, mu, lambda);
    svd.u * Matrix3::from_diagonal(&dpsi) * svd.v.transpose()
}

/// Non-zero entries of the diagonal-space 9×9 matrix M.
///
/// Tensor index 3a+b addresses the basis matrix U·eₐe_bᵗ·Vᵗ; the A block
/// couples the stretch directions (0,0), (1,1), (2,2) and each B block
/// couples one off-diagonal pair.
const M_PATTERN: [(usize, usize); 21] = [
    (0, 0),
    (0, 4),
    (0, 8),
    (4, 0),
    (4, 4),
    (4, 8),
    (8, 0),
    (8, 4),
    (8, 8),
    (1, 1),
    (1, 3),
    (3, 1),
    (3, 3),
    (5, 5),
    (5, 7),
    (7, 5),
    (7, 7),
    (2, 2),
    (2, 6),
    (6, 2),
    (6, 6),
];

/// The 9×9 tensor ∂P/∂F, indexed as `(3i+j, 3r+s) = ∂P_ij/∂F_rs`.
///
/// With `project_spd` the diagonal-space blocks are eigen-clamped first,
/// which makes the result positive-semidefinite.
pub fn dp_df(
    variant: MaterialVariant,
    svd: &RotationSvd,
    mu: f64,
    lambda: f64,
    project_spd: bool,
) -> SMatrix<f64, 9, 9> {
    let sigma = &svd.sigma;

    let mut a = d2_energy_d_sigma2(variant, sigma, mu, lambda);
    if project_spd {
        make_psd3(&mut a);
    }

    let dpsi = d_energy_d_sigma(variant, sigma, mu, lambda);
    let b_left = b_left_coefficients(variant, sigma, mu, lambda);

    let mut b_blocks = [Matrix2::zeros(); 3];
    for (p, block) in b_blocks.iter_mut().enumerate() {
        let q = (p + 1) % 3;
        let sum = (sigma[p] + sigma[q]).max(DENOM_EPS);
        let right = (dpsi[p] + dpsi[q]) / (2.0 * sum);
        let left = b_left[p];
        *block = Matrix2::new(left + right, left - right, left - right, left + right);
        if project_spd {
            make_psd2(block);
        }
    }

    // Scatter A and the B blocks into diagonal space
    let mut m = SMatrix::<f64, 9, 9>::zeros();
    for i in 0..3 {
        for k in 0..3 {
            m[(4 * i, 4 * k)] = a[(i, k)];
        }
    }
    m[(1, 1)] = b_blocks[0][(0, 0)];
    m[(1, 3)] = b_blocks[0][(0, 1)];
    m[(3, 1)] = b_blocks[0][(1, 0)];
    m[(3, 3)] = b_blocks[0][(1, 1)];

    m[(5, 5)] = b_blocks[1][(0, 0)];
    m[(5, 7)] = b_blocks[1][(0, 1)];
    m[(7, 5)] = b_blocks[1][(1, 0)];
    m[(7, 7)] = b_blocks[1][(1, 1)];

    m[(2, 2)] = b_blocks[2][(1, 1)];
    m[(2, 6)] = b_blocks[2][(1, 0)];
    m[(6, 2)] = b_blocks[2][(0, 1)];
    m[(6, 6)] = b_blocks[2][(0, 0)];

    // Transform back to F-space: dP_ij/dF_rs = Σ M(ab,cd)·U_ia·V_jb·U_rc·V_sd
    let u = &svd.u;
    let v = &svd.v;
    let mut dpdf = SMatrix::<f64, 9, 9>::zeros();
    for i in 0..3 {
        for j in 0..3 {
            let ij = 3 * i + j;
            for r in 0..3 {
                for s in 0..3 {
                    let rs = 3 * r + s;
                    if rs < ij {
                        dpdf[(ij, rs)] = dpdf[(rs, ij)];
                        continue;
                    }
                    let mut value = 0.0;
                    for &(pq, cd) in M_PATTERN.iter() {
                        value += m[(pq, cd)]
                            * u[(i, pq / 3)]
                            * v[(j, pq % 3)]
                            * u[(r, cd / 3)]
                            * v[(s, cd % 3)];
                    }
                    dpdf[(ij, rs)] = value;
                }
            }
        }
    }
    dpdf
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::SymmetricEigen;

    const MU: f64 = 1.3;
    const LAMBDA: f64 = 2.7;

    fn variants() -> [MaterialVariant; 2] {
        [MaterialVariant::Common, MaterialVariant::Stable]
    }

    fn test_gradient() -> Matrix3<f64> {
        // A generic deformation: stretch + shear, well away from degeneracy
        Matrix3::new(1.2, 0.1, 0.0, -0.05, 0.9, 0.2, 0.1, 0.0, 1.1)
    }

    #[test]
    fn rest_state_has_zero_energy_and_stress() {
        let svd = RotationSvd::new(&Matrix3::identity()).unwrap();
        for variant in variants() {
            let e = energy_density(variant, &svd.sigma, MU, LAMBDA);
            assert!(e.abs() < 1e-12, "{variant:?}: energy {e} at rest");
            let p = first_piola_kirchhoff(variant, &svd, MU, LAMBDA);
            assert!(p.norm() < 1e-10, "{variant:?}: stress {p} at rest");
        }
    }

    #[test]
    fn stress_matches_energy_gradient() {
        let f0 = test_gradient();
        let h = 1e-6;
        for variant in variants() {
            let svd = RotationSvd::new(&f0).unwrap();
            let p = first_piola_kirchhoff(variant, &svd, MU, LAMBDA);

            for r in 0..3 {
                for c in 0..3 {
                    let mut fp = f0;
                    fp[(r, c)] += h;
                    let mut fm = f0;
                    fm[(r, c)] -= h;
                    let ep = energy_density(
                        variant,
                        &RotationSvd::new(&fp).unwrap().sigma,
                        MU,
                        LAMBDA,
                    );
                    let em = energy_density(
                        variant,
                        &RotationSvd::new(&fm).unwrap().sigma,
                        MU,
                        LAMBDA,
                    );
                    let fd = (ep - em) / (2.0 * h);
                    assert!(
                        (p[(r, c)] - fd).abs() < 1e-5,
                        "{variant:?}: dΨ/dF[{r},{c}] = {} vs FD {fd}",
                        p[(r, c)]
                    );
                }
            }
        }
    }

    #[test]
    fn dp_df_matches_stress_finite_differences() {
        let f0 = test_gradient();
        let h = 1e-6;
        for variant in variants() {
            let svd = RotationSvd::new(&f0).unwrap();
            let dpdf = dp_df(variant, &svd, MU, LAMBDA, false);

            for r in 0..3 {
                for s in 0..3 {
                    let mut fp = f0;
                    fp[(r, s)] += h;
                    let mut fm = f0;
                    fm[(r, s)] -= h;
                    let pp = first_piola_kirchhoff(
                        variant,
                        &RotationSvd::new(&fp).unwrap(),
                        MU,
                        LAMBDA,
                    );
                    let pm = first_piola_kirchhoff(
                        variant,
                        &RotationSvd::new(&fm).unwrap(),
                        MU,
                        LAMBDA,
                    );
                    for i in 0..3 {
                        for j in 0..3 {
                            let fd = (pp[(i, j)] - pm[(i, j)]) / (2.0 * h);
                            let exact = dpdf[(3 * i + j, 3 * r + s)];
                            assert!(
                                (exact - fd).abs() < 1e-4,
                                "{variant:?}: dP[{i},{j}]/dF[{r},{s}] = {exact} vs FD {fd}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn repeated_singular_values_stay_finite() {
        // σ₁ = σ₂: the twist/flip denominators degenerate
        let f = Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.5);
        let svd = RotationSvd::new(&f).unwrap();
        for variant in variants() {
            let dpdf = dp_df(variant, &svd, MU, LAMBDA, false);
            assert!(
                dpdf.iter().all(|v| v.is_finite()),
                "{variant:?}: non-finite entries for repeated σ"
            );
            let p = first_piola_kirchhoff(variant, &svd, MU, LAMBDA);
            assert!(p.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn near_collapsed_element_does_not_produce_nan() {
        let f = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1e-12);
        let svd = RotationSvd::new(&f).unwrap();
        for variant in variants() {
            let e = energy_density(variant, &svd.sigma, MU, LAMBDA);
            let p = first_piola_kirchhoff(variant, &svd, MU, LAMBDA);
            let dpdf = dp_df(variant, &svd, MU, LAMBDA, true);
            assert!(e.is_finite());
            assert!(p.iter().all(|v| v.is_finite()));
            assert!(dpdf.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn projection_makes_compressed_hessian_psd() {
        // Strong compression: the unprojected Hessian is indefinite
        let f = Matrix3::new(0.3, 0.0, 0.0, 0.0, 0.25, 0.0, 0.0, 0.0, 0.2);
        let svd = RotationSvd::new(&f).unwrap();
        for variant in variants() {
            let dpdf = dp_df(variant, &svd, MU, LAMBDA, true);
            let eigen = SymmetricEigen::new(dpdf);
            let scale = eigen.eigenvalues.iter().fold(0.0f64, |a, &l| a.max(l.abs()));
            for &l in eigen.eigenvalues.iter() {
                assert!(
                    l >= -1e-10 * scale.max(1.0),
                    "{variant:?}: projected Hessian has eigenvalue {l}"
                );
            }
        }
    }
}
