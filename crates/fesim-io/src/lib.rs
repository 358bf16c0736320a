//! I/O utilities for the fesim workspace.
//!
//! Everything that touches the filesystem lives here: scenario files,
//! mesh files, and per-frame state snapshots. The solver crate consumes
//! the in-memory results and never parses file formats itself.

pub mod error;
pub mod mesh_file;
pub mod scenario_file;
pub mod snapshot;

pub use error::{IoError, Result};
pub use mesh_file::{MeshArrays, load_tet_mesh};
pub use scenario_file::load_scenario;
pub use snapshot::{FrameSnapshot, load_snapshot, read_record, save_snapshot, write_record};
