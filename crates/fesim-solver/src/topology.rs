//! Symbolic sparse topology and the constrained-DOF index map.
//!
//! Both are computed once and reused for the whole run: the non-zero
//! pattern of the combined mass/damping/stiffness matrix follows from
//! element connectivity alone (every node pair sharing an element
//! contributes a 3×3 block), and the full↔reduced DOF bijection follows
//! from the constrained-node set alone. Re-deriving either per frame would
//! regress the numeric solve from near-linear to super-linear cost, so the
//! assembler and reducer only ever refresh values inside these structures.

use std::collections::BTreeSet;

use nalgebra_sparse::CsrMatrix;

use crate::mesh::TetMesh;

/// Symbolic CSR pattern of the global system matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsePattern {
    size: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
}

impl SparsePattern {
    /// Build the DOF-level pattern from element connectivity.
    pub fn build(mesh: &TetMesh) -> Self {
        let num_dofs = mesh.num_dofs();
        let mut rows: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_dofs];

        // Mass sits on the diagonal even for nodes outside every element
        for (dof, row) in rows.iter_mut().enumerate() {
            row.insert(dof);
        }

        for tet in mesh.tets() {
            for &a in tet {
                for &b in tet {
                    for k in 0..3 {
                        for l in 0..3 {
                            rows[3 * a + k].insert(3 * b + l);
                        }
                    }
                }
            }
        }

        Self::from_row_sets(num_dofs, &rows)
    }

    /// Flatten per-row column sets into CSR offsets/indices.
    pub(crate) fn from_row_sets(size: usize, rows: &[BTreeSet<usize>]) -> Self {
        let mut row_offsets = Vec::with_capacity(size + 1);
        let mut col_indices = Vec::new();
        row_offsets.push(0);
        for row in rows {
            col_indices.extend(row.iter().copied());
            row_offsets.push(col_indices.len());
        }
        Self {
            size,
            row_offsets,
            col_indices,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Position of entry (row, col) in the value array, if present.
    pub fn value_index(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_offsets[row];
        let end = self.row_offsets[row + 1];
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|k| start + k)
    }

    /// Entries of one row as (value index, column) pairs.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let start = self.row_offsets[row];
        let end = self.row_offsets[row + 1];
        (start..end).map(move |vi| (vi, self.col_indices[vi]))
    }

    /// Allocate a zero-valued CSR matrix with this pattern.
    pub fn allocate_csr(&self) -> CsrMatrix<f64> {
        CsrMatrix::try_from_csr_data(
            self.size,
            self.size,
            self.row_offsets.clone(),
            self.col_indices.clone(),
            vec![0.0; self.nnz()],
        )
        .expect("pattern invariants guarantee valid CSR data")
    }
}

/// Bijection between full DOF indices (0..3N) and reduced indices over
/// unconstrained DOFs.
///
/// Rebuilt only when the constrained-node set changes; building twice from
/// the same set yields the same map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofMap {
    full_to_reduced: Vec<Option<usize>>,
    reduced_to_full: Vec<usize>,
}

impl DofMap {
    /// Build the map for a constrained-node set (all 3 DOFs of each node).
    pub fn build(num_nodes: usize, constrained_nodes: &BTreeSet<usize>) -> Self {
        let num_dofs = 3 * num_nodes;
        let mut full_to_reduced = vec![None; num_dofs];
        let mut reduced_to_full = Vec::with_capacity(num_dofs);
        for dof in 0..num_dofs {
            if !constrained_nodes.contains(&(dof / 3)) {
                full_to_reduced[dof] = Some(reduced_to_full.len());
                reduced_to_full.push(dof);
            }
        }
        Self {
            full_to_reduced,
            reduced_to_full,
        }
    }

    pub fn full_len(&self) -> usize {
        self.full_to_reduced.len()
    }

    pub fn reduced_len(&self) -> usize {
        self.reduced_to_full.len()
    }

    /// Reduced index of a full DOF, or `None` if constrained.
    pub fn to_reduced(&self, full: usize) -> Option<usize> {
        self.full_to_reduced[full]
    }

    /// Full index of a reduced DOF.
    pub fn to_full(&self, reduced: usize) -> usize {
        self.reduced_to_full[reduced]
    }

    pub fn is_constrained(&self, full: usize) -> bool {
        self.full_to_reduced[full].is_none()
    }
}
