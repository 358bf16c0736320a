//! Scenario description types.
//!
//! The scenario file is the only configuration input the solver consumes.
//! Material parameters may be given either directly as Lamé parameters
//! (μ, λ) or as a Young's-modulus/Poisson-ratio pair; the conversion is done
//! here so the solver always sees (μ, λ).

use serde::{Deserialize, Serialize};

/// Execution platform selector for per-element evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionPlatform {
    /// Sequential element evaluation
    #[default]
    #[serde(rename = "CPU")]
    Cpu,
    /// Multi-core element evaluation (rayon fan-out, sequential scatter)
    #[serde(rename = "OPENMP")]
    OpenMp,
    /// GPU offload; accepted by the schema but rejected at initialization
    #[serde(rename = "CUDA")]
    Cuda,
}

/// Hyperelastic material variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialVariant {
    /// Compressible Neo-Hookean with a logarithmic volume term
    Common,
    /// Inversion-safe ("stable") Neo-Hookean
    #[default]
    Stable,
}

/// Material parameter specification for one model.
///
/// Either (`mu`, `lambda`) or (`youngs_modulus`, `poissons_ratio`) must be
/// given; when both pairs are present the Lamé pair wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSpec {
    /// Material variant to use
    #[serde(default)]
    pub variant: MaterialVariant,
    /// Shear modulus μ [Pa]
    #[serde(default)]
    pub mu: Option<f64>,
    /// First Lamé parameter λ [Pa]
    #[serde(default)]
    pub lambda: Option<f64>,
    /// Young's modulus E [Pa]
    #[serde(default)]
    pub youngs_modulus: Option<f64>,
    /// Poisson's ratio ν [-]
    #[serde(default)]
    pub poissons_ratio: Option<f64>,
    /// Density ρ [kg/m³]
    pub density: f64,
}

impl MaterialSpec {
    /// Resolve the Lamé pair (μ, λ), converting from (E, ν) when needed.
    ///
    /// μ = E / (2(1 + ν)), λ = Eν / ((1 + ν)(1 − 2ν))
    pub fn lame_parameters(&self) -> Result<(f64, f64), String> {
        if let (Some(mu), Some(lambda)) = (self.mu, self.lambda) {
            return Ok((mu, lambda));
        }
        match (self.youngs_modulus, self.poissons_ratio) {
            (Some(e), Some(nu)) => {
                if e <= 0.0 {
                    return Err(format!("Young's modulus must be positive (got {e})"));
                }
                if !(-1.0..0.5).contains(&nu) {
                    return Err(format!("Poisson's ratio must lie in [-1, 0.5) (got {nu})"));
                }
                let mu = e / (2.0 * (1.0 + nu));
                let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
                Ok((mu, lambda))
            }
            _ => Err("material needs either (mu, lambda) or (youngs_modulus, poissons_ratio)"
                .to_string()),
        }
    }
}

/// One deformable model inside a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Path to the mesh (TetGen-style `.node`/`.ele` pair, given without extension)
    pub mesh: String,
    /// Material parameters for every element of this model
    pub material: MaterialSpec,
    /// Node indices whose position is pinned (0-based)
    #[serde(default)]
    pub fixed_nodes: Vec<usize>,
}

/// A complete scenario description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name (used for output file naming)
    pub name: String,
    /// Execution platform for element evaluation
    #[serde(default)]
    pub platform: ExecutionPlatform,
    /// Time step h [s]
    pub time_step: f64,
    /// Number of frames the driving loop should run
    pub frames: usize,
    /// Gravity vector [m/s²]
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    /// Deformable models
    pub models: Vec<ModelSpec>,
    /// Directory for per-frame snapshots; omit to disable snapshot output
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

fn default_gravity() -> [f64; 3] {
    [0.0, -9.81, 0.0]
}

impl Scenario {
    /// Validate everything that can be checked without touching the mesh files.
    ///
    /// Configuration errors are fatal at initialization (the simulation cannot
    /// start), so this returns the full list rather than the first failure.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.time_step <= 0.0 {
            errors.push(format!("time_step must be positive (got {})", self.time_step));
        }
        if self.models.is_empty() {
            errors.push("scenario defines no models".to_string());
        }
        for (i, model) in self.models.iter().enumerate() {
            if model.mesh.is_empty() {
                errors.push(format!("model {i}: empty mesh reference"));
            }
            if let Err(e) = model.material.lame_parameters() {
                errors.push(format!("model {i}: {e}"));
            }
            if model.material.density <= 0.0 {
                errors.push(format!(
                    "model {i}: density must be positive (got {})",
                    model.material.density
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Summarize the scenario for the cli's pre-run report.
    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            name: self.name.clone(),
            platform: self.platform,
            time_step: self.time_step,
            frames: self.frames,
            num_models: self.models.len(),
            total_fixed_nodes: self.models.iter().map(|m| m.fixed_nodes.len()).sum(),
            writes_snapshots: self.snapshot_dir.is_some(),
        }
    }
}

/// Compact scenario overview printed by the driving loop before frame 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSummary {
    pub name: String,
    pub platform: ExecutionPlatform,
    pub time_step: f64,
    pub frames: usize,
    pub num_models: usize,
    pub total_fixed_nodes: usize,
    pub writes_snapshots: bool,
}
