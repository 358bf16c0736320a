//! Dirichlet constraints and the full↔reduced system reducer.
//!
//! Constrained nodes have all three DOFs pinned. The reducer caches, per
//! non-zero of the full pattern, where that entry lands in the reduced
//! pattern (or `None` when its row or column is constrained), so per-frame
//! reduction is a single pass over the value arrays with no index searches.

use std::collections::BTreeSet;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::topology::{DofMap, SparsePattern};

/// Set of nodes whose positions are held fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    nodes: BTreeSet<usize>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set wholesale. Returns true when the set changed.
    pub fn set_nodes(&mut self, nodes: impl IntoIterator<Item = usize>) -> bool {
        let next: BTreeSet<usize> = nodes.into_iter().collect();
        if next == self.nodes {
            false
        } else {
            self.nodes = next;
            true
        }
    }

    pub fn clear(&mut self) -> bool {
        if self.nodes.is_empty() {
            false
        } else {
            self.nodes.clear();
            true
        }
    }

    pub fn contains(&self, node: usize) -> bool {
        self.nodes.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &BTreeSet<usize> {
        &self.nodes
    }
}

/// Maps the assembled full system onto the unconstrained subspace.
#[derive(Debug, Clone)]
pub struct Reducer {
    dof_map: DofMap,
    reduced_pattern: SparsePattern,
    // full value index -> reduced value index, None when dropped
    entry_map: Vec<Option<usize>>,
}

impl Reducer {
    /// Derive the reduced pattern and entry map from the full pattern and
    /// the current constraint set.
    pub fn build(full: &SparsePattern, num_nodes: usize, constraints: &ConstraintSet) -> Self {
        let dof_map = DofMap::build(num_nodes, constraints.nodes());

        let mut row_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); dof_map.reduced_len()];
        for row in 0..full.size() {
            let Some(rr) = dof_map.to_reduced(row) else {
                continue;
            };
            for (_, col) in full.row_entries(row) {
                if let Some(rc) = dof_map.to_reduced(col) {
                    row_sets[rr].insert(rc);
                }
            }
        }
        let reduced_pattern = SparsePattern::from_row_sets(dof_map.reduced_len(), &row_sets);

        // Column order is preserved row by row, so the surviving entries of
        // a full row map onto consecutive reduced entries.
        let mut entry_map = vec![None; full.nnz()];
        for row in 0..full.size() {
            let Some(rr) = dof_map.to_reduced(row) else {
                continue;
            };
            let mut cursor = reduced_pattern.row_offsets()[rr];
            for (vi, col) in full.row_entries(row) {
                if dof_map.to_reduced(col).is_some() {
                    entry_map[vi] = Some(cursor);
                    cursor += 1;
                }
            }
            debug_assert_eq!(cursor, reduced_pattern.row_offsets()[rr + 1]);
        }

        Self {
            dof_map,
            reduced_pattern,
            entry_map,
        }
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn reduced_pattern(&self) -> &SparsePattern {
        &self.reduced_pattern
    }

    pub fn reduced_len(&self) -> usize {
        self.dof_map.reduced_len()
    }

    /// Zero-valued reduced-pattern CSR matrix.
    pub fn allocate_reduced(&self) -> CsrMatrix<f64> {
        self.reduced_pattern.allocate_csr()
    }

    /// Copy the surviving values of the full matrix into the reduced one.
    ///
    /// Every reduced entry has exactly one source entry, so this is a plain
    /// assignment rather than an accumulation.
    pub fn reduce_matrix_into(&self, full: &CsrMatrix<f64>, reduced: &mut CsrMatrix<f64>) {
        let src = full.values();
        let dst = reduced.values_mut();
        for (vi, target) in self.entry_map.iter().enumerate() {
            if let Some(ri) = target {
                dst[*ri] = src[vi];
            }
        }
    }

    /// Gather unconstrained entries of a full vector.
    pub fn reduce_vector(&self, full: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.dof_map.reduced_len(), |r, _| {
            full[self.dof_map.to_full(r)]
        })
    }

    /// Scatter a reduced vector into a fresh full vector, zeros elsewhere.
    pub fn expand_with_zeros(&self, reduced: &DVector<f64>) -> DVector<f64> {
        let mut full = DVector::zeros(self.dof_map.full_len());
        self.expand_into(reduced, &mut full);
        full
    }

    /// Scatter a reduced vector into a full vector, leaving constrained
    /// entries untouched.
    pub fn expand_into(&self, reduced: &DVector<f64>, full: &mut DVector<f64>) {
        for r in 0..self.dof_map.reduced_len() {
            full[self.dof_map.to_full(r)] = reduced[r];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::Material;
    use crate::mesh::{TetMesh, unit_tet_positions};
    use fesim_model::MaterialVariant;

    fn single_tet_mesh() -> TetMesh {
        TetMesh::new(
            unit_tet_positions(),
            vec![[0, 1, 2, 3]],
            Material::new(MaterialVariant::Stable, 1.0e5, 2.0e5, 1000.0),
        )
        .unwrap()
    }

    #[test]
    fn constraint_set_reports_changes() {
        let mut set = ConstraintSet::new();
        assert!(set.set_nodes([0, 2]));
        assert!(!set.set_nodes([2, 0]));
        assert!(set.contains(2));
        assert_eq!(set.len(), 2);
        assert!(set.clear());
        assert!(!set.clear());
    }

    #[test]
    fn reducer_drops_constrained_rows_and_columns() {
        let mesh = single_tet_mesh();
        let pattern = SparsePattern::build(&mesh);
        let mut constraints = ConstraintSet::new();
        constraints.set_nodes([0]);
        let reducer = Reducer::build(&pattern, mesh.num_nodes(), &constraints);

        assert_eq!(reducer.reduced_len(), 9);
        assert_eq!(reducer.reduced_pattern().nnz(), 81);
    }

    #[test]
    fn matrix_reduction_keeps_entry_values() {
        let mesh = single_tet_mesh();
        let pattern = SparsePattern::build(&mesh);
        let mut constraints = ConstraintSet::new();
        constraints.set_nodes([1]);
        let reducer = Reducer::build(&pattern, mesh.num_nodes(), &constraints);

        let mut full = pattern.allocate_csr();
        for (vi, value) in full.values_mut().iter_mut().enumerate() {
            *value = vi as f64 + 1.0;
        }
        let mut reduced = reducer.allocate_reduced();
        reducer.reduce_matrix_into(&full, &mut reduced);

        for (row, col, value) in reduced.triplet_iter() {
            let full_row = reducer.dof_map().to_full(row);
            let full_col = reducer.dof_map().to_full(col);
            let vi = pattern.value_index(full_row, full_col).unwrap();
            assert_eq!(*value, vi as f64 + 1.0);
        }
    }

    #[test]
    fn vector_round_trip_preserves_unconstrained_entries() {
        let mesh = single_tet_mesh();
        let pattern = SparsePattern::build(&mesh);
        let mut constraints = ConstraintSet::new();
        constraints.set_nodes([2]);
        let reducer = Reducer::build(&pattern, mesh.num_nodes(), &constraints);

        let full = DVector::from_fn(12, |i, _| i as f64 * 0.5);
        let reduced = reducer.reduce_vector(&full);
        assert_eq!(reduced.len(), 9);

        let expanded = reducer.expand_with_zeros(&reduced);
        for dof in 0..12 {
            if reducer.dof_map().is_constrained(dof) {
                assert_eq!(expanded[dof], 0.0);
            } else {
                assert_eq!(expanded[dof], full[dof]);
            }
        }
    }

    #[test]
    fn expand_into_leaves_constrained_entries_alone() {
        let mesh = single_tet_mesh();
        let pattern = SparsePattern::build(&mesh);
        let mut constraints = ConstraintSet::new();
        constraints.set_nodes([3]);
        let reducer = Reducer::build(&pattern, mesh.num_nodes(), &constraints);

        let reduced = DVector::from_element(9, 2.0);
        let mut full = DVector::from_element(12, -1.0);
        reducer.expand_into(&reduced, &mut full);
        for dof in 0..12 {
            let expected = if reducer.dof_map().is_constrained(dof) {
                -1.0
            } else {
                2.0
            };
            assert_eq!(full[dof], expected);
        }
    }
}
