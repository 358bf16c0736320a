//! Scenario data model for the fesim workspace.
//!
//! A scenario is the declarative description consumed at simulator
//! initialization: per model a mesh reference, material parameters, the
//! constrained-node specification, plus time step, gravity, frame count and
//! the execution platform. Parsing the scenario file itself lives in
//! `fesim-io`; this crate only defines the types and their validation.

pub mod scenario;

pub use scenario::{
    ExecutionPlatform, MaterialSpec, MaterialVariant, ModelSpec, Scenario, ScenarioSummary,
};
