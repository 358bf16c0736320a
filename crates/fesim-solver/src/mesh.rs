//! Tetrahedral mesh for finite element elastodynamics.
//!
//! The mesh is immutable after construction: rest positions, connectivity,
//! per-element materials and the derived rest-shape data (inverse shape
//! matrix, volume, lumped nodal mass) are computed once and never change.
//! A tetrahedron whose rest shape is non-invertible is a configuration
//! error reported here, not during assembly.

use nalgebra::{DVector, Matrix3, Vector3};

use crate::materials::Material;

/// Determinant floor below which a rest shape counts as degenerate.
const REST_SHAPE_EPS: f64 = 1e-12;

/// Immutable tetrahedral reference geometry plus derived per-element data.
#[derive(Debug, Clone)]
pub struct TetMesh {
    /// Rest positions
    positions: Vec<Vector3<f64>>,
    /// Tetrahedra as 0-based node index 4-tuples
    tets: Vec<[usize; 4]>,
    /// Per-element materials
    materials: Vec<Material>,
    /// Inverse rest-shape matrix Dm⁻¹ per element
    rest_inverses: Vec<Matrix3<f64>>,
    /// Rest volume per element
    volumes: Vec<f64>,
    /// Lumped mass per node (quarter of each incident element's mass)
    node_mass: Vec<f64>,
}

impl TetMesh {
    /// Build a mesh with one material shared by all elements.
    ///
    /// # Errors
    /// Fails if any node index is out of range or any element's rest shape
    /// matrix is non-invertible (collapsed tetrahedron).
    pub fn new(
        positions: Vec<[f64; 3]>,
        tets: Vec<[usize; 4]>,
        material: Material,
    ) -> Result<Self, String> {
        let materials = vec![material; tets.len()];
        Self::with_materials(positions, tets, materials)
    }

    /// Build a mesh with per-element materials.
    pub fn with_materials(
        positions: Vec<[f64; 3]>,
        tets: Vec<[usize; 4]>,
        materials: Vec<Material>,
    ) -> Result<Self, String> {
        if materials.len() != tets.len() {
            return Err(format!(
                "expected one material per element ({} elements, {} materials)",
                tets.len(),
                materials.len()
            ));
        }
        let positions: Vec<Vector3<f64>> =
            positions.iter().map(|p| Vector3::new(p[0], p[1], p[2])).collect();

        let mut rest_inverses = Vec::with_capacity(tets.len());
        let mut volumes = Vec::with_capacity(tets.len());
        let mut node_mass = vec![0.0; positions.len()];

        for (eid, tet) in tets.iter().enumerate() {
            for &n in tet {
                if n >= positions.len() {
                    return Err(format!(
                        "element {eid}: node index {n} out of range ({} nodes)",
                        positions.len()
                    ));
                }
            }
            let material = &materials[eid];
            material.validate().map_err(|e| format!("element {eid}: {e}"))?;

            let dm = Self::shape_matrix(&positions, tet);
            let det = dm.determinant();
            if det.abs() < REST_SHAPE_EPS {
                return Err(format!(
                    "element {eid}: degenerate rest shape (det = {det:e})"
                ));
            }
            let volume = det.abs() / 6.0;
            let dm_inv = dm
                .try_inverse()
                .ok_or_else(|| format!("element {eid}: rest shape not invertible"))?;

            rest_inverses.push(dm_inv);
            volumes.push(volume);

            let quarter_mass = material.density * volume / 4.0;
            for &n in tet {
                node_mass[n] += quarter_mass;
            }
        }

        Ok(Self {
            positions,
            tets,
            materials,
            rest_inverses,
            volumes,
            node_mass,
        })
    }

    /// Shape matrix Dm = [p1−p0, p2−p0, p3−p0] (columns).
    fn shape_matrix(positions: &[Vector3<f64>], tet: &[usize; 4]) -> Matrix3<f64> {
        let p0 = positions[tet[0]];
        Matrix3::from_columns(&[
            positions[tet[1]] - p0,
            positions[tet[2]] - p0,
            positions[tet[3]] - p0,
        ])
    }

    pub fn num_nodes(&self) -> usize {
        self.positions.len()
    }

    pub fn num_elements(&self) -> usize {
        self.tets.len()
    }

    /// Total degrees of freedom, 3 per node.
    pub fn num_dofs(&self) -> usize {
        3 * self.positions.len()
    }

    pub fn tet(&self, eid: usize) -> &[usize; 4] {
        &self.tets[eid]
    }

    pub fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }

    pub fn material(&self, eid: usize) -> &Material {
        &self.materials[eid]
    }

    pub fn rest_inverse(&self, eid: usize) -> &Matrix3<f64> {
        &self.rest_inverses[eid]
    }

    pub fn volume(&self, eid: usize) -> f64 {
        self.volumes[eid]
    }

    pub fn node_mass(&self) -> &[f64] {
        &self.node_mass
    }

    pub fn rest_position(&self, node: usize) -> &Vector3<f64> {
        &self.positions[node]
    }

    /// Rest positions flattened to a 3N state vector.
    pub fn rest_positions_vector(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.num_dofs());
        for (i, p) in self.positions.iter().enumerate() {
            x[3 * i] = p.x;
            x[3 * i + 1] = p.y;
            x[3 * i + 2] = p.z;
        }
        x
    }

    /// Lumped mass expanded to a 3N diagonal vector.
    pub fn mass_vector(&self) -> DVector<f64> {
        let mut m = DVector::zeros(self.num_dofs());
        for (i, &mass) in self.node_mass.iter().enumerate() {
            m[3 * i] = mass;
            m[3 * i + 1] = mass;
            m[3 * i + 2] = mass;
        }
        m
    }
}

/// A unit right tetrahedron, the smallest useful test mesh.
///
/// Nodes: origin plus the three axis unit points; volume 1/6.
pub fn unit_tet_positions() -> Vec<[f64; 3]> {
    vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ]
}
