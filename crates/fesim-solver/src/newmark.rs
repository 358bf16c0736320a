//! Newmark-β time integration coefficients and state updates.

use serde::{Deserialize, Serialize};

/// Newmark parameters plus Rayleigh damping weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NewmarkConfig {
    /// Newmark β, controls the acceleration weighting of the predictor
    pub beta: f64,
    /// Newmark γ, controls the velocity update
    pub gamma: f64,
    /// Mass-proportional Rayleigh damping α
    pub alpha_damping: f64,
    /// Stiffness-proportional Rayleigh damping β
    pub beta_damping: f64,
}

/// Per-step coefficients derived from (β, γ, h).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewmarkCoefficients {
    /// 1/(βh²), scales the inertia term of the system matrix
    pub a1: f64,
    /// 1/(βh)
    pub a2: f64,
    /// (1 − 2β)/(2β)
    pub a3: f64,
    /// γ/(βh), scales the damping term of the system matrix
    pub a4: f64,
    /// 1 − γ/β
    pub a5: f64,
    /// h(1 − γ/(2β))
    pub a6: f64,
}

impl NewmarkConfig {
    /// The unconditionally stable average-acceleration rule (β=1/4, γ=1/2).
    pub fn average_acceleration() -> Self {
        Self {
            beta: 0.25,
            gamma: 0.5,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    /// The linear-acceleration rule (β=1/6, γ=1/2).
    pub fn linear_acceleration() -> Self {
        Self {
            beta: 1.0 / 6.0,
            gamma: 0.5,
            alpha_damping: 0.0,
            beta_damping: 0.0,
        }
    }

    pub fn with_rayleigh_damping(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha_damping = alpha;
        self.beta_damping = beta;
        self
    }

    pub fn validate(&self, time_step: f64) -> Result<(), String> {
        if !(time_step > 0.0) {
            return Err(format!("time step must be positive (got {time_step})"));
        }
        if !(self.beta > 0.0) {
            return Err(format!("Newmark beta must be positive (got {})", self.beta));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(format!(
                "Newmark gamma must lie in [0, 1] (got {})",
                self.gamma
            ));
        }
        if self.alpha_damping < 0.0 || self.beta_damping < 0.0 {
            return Err(format!(
                "Rayleigh damping weights must be non-negative (got {}, {})",
                self.alpha_damping, self.beta_damping
            ));
        }
        Ok(())
    }

    pub fn coefficients(&self, h: f64) -> NewmarkCoefficients {
        let beta = self.beta;
        let gamma = self.gamma;
        NewmarkCoefficients {
            a1: 1.0 / (beta * h * h),
            a2: 1.0 / (beta * h),
            a3: (1.0 - 2.0 * beta) / (2.0 * beta),
            a4: gamma / (beta * h),
            a5: 1.0 - gamma / beta,
            a6: h * (1.0 - gamma / (2.0 * beta)),
        }
    }
}

impl Default for NewmarkConfig {
    fn default() -> Self {
        Self::average_acceleration()
    }
}

impl NewmarkConfig {
    /// Predicted position absorbing the explicit part of the update,
    /// x̃ = xₙ + h·vₙ + h²(1/2 − β)·aₙ, evaluated per DOF.
    pub fn predict(&self, x: f64, v: f64, a: f64, h: f64) -> f64 {
        x + h * v + h * h * (0.5 - self.beta) * a
    }

    /// Velocity update vₙ₊₁ = vₙ + h·((1 − γ)·aₙ + γ·aₙ₊₁).
    pub fn velocity(&self, v: f64, a_old: f64, a_new: f64, h: f64) -> f64 {
        v + h * ((1.0 - self.gamma) * a_old + self.gamma * a_new)
    }
}

impl NewmarkCoefficients {
    /// Implicit acceleration recovered from the converged position,
    /// aₙ₊₁ = a1·(x − x̃).
    pub fn acceleration(&self, x: f64, xtilde: f64) -> f64 {
        self.a1 * (x - xtilde)
    }
}
