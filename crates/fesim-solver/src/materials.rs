//! Material parameters for hyperelastic elements.
//!
//! A material is the pair of Lamé parameters (μ, λ) plus density and the
//! Neo-Hookean variant selecting the closed-form energy expressions in
//! [`crate::hyperelastic`]. Scenario-level unit conversion (Young/Poisson)
//! lives in `fesim-model`; the solver only ever sees resolved parameters.

use fesim_model::{MaterialSpec, MaterialVariant};

/// Resolved material parameters for one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Neo-Hookean variant
    pub variant: MaterialVariant,
    /// Shear modulus μ [Pa]
    pub mu: f64,
    /// First Lamé parameter λ [Pa]
    pub lambda: f64,
    /// Density ρ [kg/m³]
    pub density: f64,
}

impl Material {
    /// Create a material from explicit Lamé parameters.
    pub fn new(variant: MaterialVariant, mu: f64, lambda: f64, density: f64) -> Self {
        Self {
            variant,
            mu,
            lambda,
            density,
        }
    }

    /// Resolve a scenario material specification.
    pub fn from_spec(spec: &MaterialSpec) -> Result<Self, String> {
        let (mu, lambda) = spec.lame_parameters()?;
        let material = Self::new(spec.variant, mu, lambda, spec.density);
        material.validate()?;
        Ok(material)
    }

    /// Check the parameter ranges needed for elastodynamics.
    pub fn validate(&self) -> Result<(), String> {
        if self.mu <= 0.0 {
            return Err(format!("shear modulus must be positive (got {})", self.mu));
        }
        if self.lambda < 0.0 {
            return Err(format!(
                "Lamé lambda must be non-negative (got {})",
                self.lambda
            ));
        }
        if self.density <= 0.0 {
            return Err(format!("density must be positive (got {})", self.density));
        }
        Ok(())
    }

    /// Young's modulus E recovered from (μ, λ).
    pub fn youngs_modulus(&self) -> f64 {
        self.mu * (3.0 * self.lambda + 2.0 * self.mu) / (self.lambda + self.mu)
    }

    /// Poisson's ratio ν recovered from (μ, λ).
    pub fn poissons_ratio(&self) -> f64 {
        self.lambda / (2.0 * (self.lambda + self.mu))
    }
}
