//! Global assembly of elastic energy, internal forces and tangent stiffness.
//!
//! Per-element scatter tables (CSR value indices of the 12×12 block) are
//! precomputed once against the static pattern, so assembly never searches
//! for entries. The parallel path fans element contributions out over rayon
//! and scatters them sequentially in element order, making its output
//! bit-identical to the serial path.

use nalgebra::{DVector, Matrix3, SMatrix, Vector3};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

use crate::hyperelastic::{dp_df, energy_density, first_piola_kirchhoff};
use crate::mesh::TetMesh;
use crate::svd::RotationSvd;
use crate::topology::SparsePattern;

/// Gradient of the deformation map, G_ij,nc = ∂F_ij/∂x_nc, for one element.
type ShapeGradient = SMatrix<f64, 9, 12>;

struct ElementContribution {
    force: SMatrix<f64, 12, 1>,
    stiffness: SMatrix<f64, 12, 12>,
}

/// Assembles forces and stiffness for a fixed mesh topology.
pub struct SystemAssembler {
    // CSR value indices of each element's 12×12 block, row-major
    scatter: Vec<[usize; 144]>,
    dof_indices: Vec<[usize; 12]>,
}

impl SystemAssembler {
    pub fn new(mesh: &TetMesh, pattern: &SparsePattern) -> Result<Self, String> {
        let mut scatter = Vec::with_capacity(mesh.num_elements());
        let mut dof_indices = Vec::with_capacity(mesh.num_elements());

        for tet in mesh.tets() {
            let mut dofs = [0usize; 12];
            for (n, &node) in tet.iter().enumerate() {
                for c in 0..3 {
                    dofs[3 * n + c] = 3 * node + c;
                }
            }
            let mut indices = [0usize; 144];
            for r in 0..12 {
                for c in 0..12 {
                    indices[12 * r + c] = pattern
                        .value_index(dofs[r], dofs[c])
                        .ok_or_else(|| {
                            format!(
                                "sparse pattern is missing entry ({}, {})",
                                dofs[r], dofs[c]
                            )
                        })?;
                }
            }
            scatter.push(indices);
            dof_indices.push(dofs);
        }

        Ok(Self {
            scatter,
            dof_indices,
        })
    }

    /// Total elastic energy of the mesh at state `x`.
    pub fn elastic_energy(&self, mesh: &TetMesh, x: &DVector<f64>) -> Result<f64, String> {
        let mut energy = 0.0;
        for eid in 0..mesh.num_elements() {
            let f = deformation_gradient(mesh, eid, &self.dof_indices[eid], x);
            let svd = RotationSvd::new(&f)?;
            let mat = mesh.material(eid);
            energy +=
                mesh.volume(eid) * energy_density(mat.variant, &svd.sigma, mat.mu, mat.lambda);
        }
        Ok(energy)
    }

    /// Assemble the tangent stiffness and internal force at state `x`.
    ///
    /// `internal_force` receives ∂E/∂x, the gradient of the elastic energy,
    /// so the nodal restoring force is its negation. `stiffness` must carry
    /// the pattern this assembler was built against; its values are
    /// overwritten.
    pub fn assemble(
        &self,
        mesh: &TetMesh,
        x: &DVector<f64>,
        project_spd: bool,
        parallel: bool,
        stiffness: &mut CsrMatrix<f64>,
        internal_force: &mut DVector<f64>,
    ) -> Result<(), String> {
        let contributions: Vec<ElementContribution> = if parallel {
            (0..mesh.num_elements())
                .into_par_iter()
                .map(|eid| self.element_contribution(mesh, eid, x, project_spd))
                .collect::<Result<Vec<_>, String>>()?
        } else {
            (0..mesh.num_elements())
                .map(|eid| self.element_contribution(mesh, eid, x, project_spd))
                .collect::<Result<Vec<_>, String>>()?
        };

        stiffness.values_mut().fill(0.0);
        internal_force.fill(0.0);
        let values = stiffness.values_mut();
        for (eid, contribution) in contributions.iter().enumerate() {
            let dofs = &self.dof_indices[eid];
            let indices = &self.scatter[eid];
            for r in 0..12 {
                internal_force[dofs[r]] += contribution.force[r];
                for c in 0..12 {
                    values[indices[12 * r + c]] += contribution.stiffness[(r, c)];
                }
            }
        }
        Ok(())
    }

    fn element_contribution(
        &self,
        mesh: &TetMesh,
        eid: usize,
        x: &DVector<f64>,
        project_spd: bool,
    ) -> Result<ElementContribution, String> {
        let dofs = &self.dof_indices[eid];
        let f = deformation_gradient(mesh, eid, dofs, x);
        let svd = RotationSvd::new(&f)?;
        let mat = mesh.material(eid);
        let vol = mesh.volume(eid);

        let p = first_piola_kirchhoff(mat.variant, &svd, mat.mu, mat.lambda);
        let dpdf = dp_df(mat.variant, &svd, mat.mu, mat.lambda, project_spd);

        let g = shape_gradient(mesh.rest_inverse(eid));
        let p_vec = flatten_row_major(&p);

        let force = vol * g.transpose() * p_vec;
        let stiffness = vol * g.transpose() * dpdf * g;
        Ok(ElementContribution { force, stiffness })
    }
}

/// F = Ds·Dm⁻¹ with Ds the deformed shape matrix of the element.
fn deformation_gradient(
    mesh: &TetMesh,
    eid: usize,
    dofs: &[usize; 12],
    x: &DVector<f64>,
) -> Matrix3<f64> {
    let node = |n: usize| Vector3::new(x[dofs[3 * n]], x[dofs[3 * n + 1]], x[dofs[3 * n + 2]]);
    let p0 = node(0);
    let ds = Matrix3::from_columns(&[node(1) - p0, node(2) - p0, node(3) - p0]);
    ds * mesh.rest_inverse(eid)
}

/// ∂F/∂x for one element, with F flattened row-major (index 3i+j).
///
/// Node n > 0, coordinate c moves row c of Ds, so ∂F_ij/∂x_nc = δ_ic·B_{n-1,j}
/// with B = Dm⁻¹; node 0 carries the negated column sums.
fn shape_gradient(rest_inverse: &Matrix3<f64>) -> ShapeGradient {
    let b = rest_inverse;
    let mut g = ShapeGradient::zeros();
    for i in 0..3 {
        for j in 0..3 {
            let row = 3 * i + j;
            for n in 1..4 {
                g[(row, 3 * n + i)] = b[(n - 1, j)];
            }
            g[(row, i)] = -(b[(0, j)] + b[(1, j)] + b[(2, j)]);
        }
    }
    g
}

fn flatten_row_major(m: &Matrix3<f64>) -> SMatrix<f64, 9, 1> {
    SMatrix::<f64, 9, 1>::from_fn(|k, _| m[(k / 3, k % 3)])
}
