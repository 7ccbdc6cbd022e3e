use derive_builder::Builder;

use crate::error::{OpfError, Result};

/// Default termination tolerance on the per-unit power mismatch.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Tunable parameters for a single OPF run.
///
/// Construction never fails and bound ordering is not checked here; see
/// [`Configuration::validate`] for the opt-in check.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct Configuration {
    /// Per-phase base power, in units of `power_scale_factor` watts.
    pub base_power: f64,

    /// Watts per engineering power unit (1000 for kW data).
    pub power_scale_factor: f64,

    /// Upper per-phase voltage magnitude limit (p.u.).
    pub voltage_upper_bound: f64,

    /// Lower per-phase voltage magnitude limit (p.u.).
    pub voltage_lower_bound: f64,

    /// Solver print level. 0 is silent, 5 and above traces every iteration.
    pub solver_verbosity: usize,

    // Termination tolerance. Unset means 1e-8.
    #[builder(setter(strip_option))]
    pub tolerance: Option<f64>,

    // Acceptable tolerance once the iteration limit is reached. Unset means 1e-8.
    #[builder(setter(strip_option))]
    pub acceptable_tolerance: Option<f64>,

    /// Maximum number of Newton iterations.
    pub max_iterations: usize,

    /// Generator that receives the linear cost coefficients.
    #[builder(setter(into))]
    pub generator_id: String,

    /// Optional limit on the voltage unbalance factor |V2|/|V1|.
    #[builder(setter(strip_option))]
    pub unbalance_bound: Option<f64>,

    /// Reject inconsistent values before solving.
    pub check_bounds: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_power: 1.0,
            power_scale_factor: 1000.0,
            voltage_upper_bound: 1.10,
            voltage_lower_bound: 0.94,
            solver_verbosity: 1,
            tolerance: None,
            acceptable_tolerance: None,
            max_iterations: 50,
            generator_id: "1".to_string(),
            unbalance_bound: None,
            check_bounds: false,
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Checks bound ordering and base values.
    ///
    /// Only called by the orchestrator when `check_bounds` is set.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_power > 0.0) {
            return Err(OpfError::InvalidConfig(format!(
                "base power must be positive, got {}",
                self.base_power
            )));
        }
        if !(self.power_scale_factor > 0.0) {
            return Err(OpfError::InvalidConfig(format!(
                "power scale factor must be positive, got {}",
                self.power_scale_factor
            )));
        }
        if !(self.voltage_lower_bound < self.voltage_upper_bound) {
            return Err(OpfError::InvalidConfig(format!(
                "voltage lower bound ({}) must be below upper bound ({})",
                self.voltage_lower_bound, self.voltage_upper_bound
            )));
        }
        if let Some(vuf) = self.unbalance_bound {
            if !(vuf > 0.0) {
                return Err(OpfError::InvalidConfig(format!(
                    "unbalance bound must be positive, got {}",
                    vuf
                )));
            }
        }
        Ok(())
    }
}

/// Options understood by the nonlinear solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    pub print_level: usize,

    // Termination tolerance on per unit P & Q mismatch.
    pub tol: f64,

    // Mismatch accepted as "almost solved" once max_iter is reached.
    pub acceptable_tol: f64,

    pub max_iter: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        configure(&Configuration::default())
    }
}

/// Maps a configuration onto solver options.
pub fn configure(config: &Configuration) -> SolverOptions {
    SolverOptions {
        print_level: config.solver_verbosity,
        tol: config.tolerance.unwrap_or(DEFAULT_TOLERANCE),
        acceptable_tol: config.acceptable_tolerance.unwrap_or(DEFAULT_TOLERANCE),
        max_iter: config.max_iterations,
    }
}
