//! Implicit Newton–Newmark elastodynamics on tetrahedral meshes.
//!
//! The crate builds the static symbolic structures of a simulation once
//! (sparse topology, scatter tables, constrained-DOF map) and then steps
//! SVD-space Neo-Hookean solids with the Newmark-β rule, a projected-Newton
//! solve and an energy-backtracking line search per frame.

pub mod assembly;
pub mod backend;
pub mod constraints;
pub mod hyperelastic;
pub mod materials;
pub mod mesh;
pub mod newmark;
pub mod simulator;
pub mod svd;
pub mod topology;

pub use assembly::SystemAssembler;
pub use backend::{ReducedSolver, SolveInfo, SparseCholeskyBackend};
pub use constraints::{ConstraintSet, Reducer};
pub use materials::Material;
pub use mesh::TetMesh;
pub use newmark::{NewmarkCoefficients, NewmarkConfig};
pub use simulator::{FemSimulator, FrameReport, SolverConfig};
pub use svd::RotationSvd;
pub use topology::{DofMap, SparsePattern};
