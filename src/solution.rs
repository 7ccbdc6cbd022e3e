use std::collections::BTreeMap;
use std::fmt;

/// Outcome reported by a nonlinear solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStatus {
    /// Converged to the requested tolerance with all constraints satisfied.
    LocallySolved,
    /// Stopped at the iteration limit within the acceptable tolerance.
    AlmostLocallySolved,
    /// Converged to a point that violates a bound constraint.
    LocallyInfeasible,
    IterationLimit,
    NumericalError,
}

impl TerminationStatus {
    pub fn is_solved(&self) -> bool {
        *self == TerminationStatus::LocallySolved
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationStatus::LocallySolved => "LOCALLY_SOLVED",
            TerminationStatus::AlmostLocallySolved => "ALMOST_LOCALLY_SOLVED",
            TerminationStatus::LocallyInfeasible => "LOCALLY_INFEASIBLE",
            TerminationStatus::IterationLimit => "ITERATION_LIMIT",
            TerminationStatus::NumericalError => "NUMERICAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BusSolution {
    pub terminals: Vec<usize>,

    /// Voltage magnitude per terminal (p.u., or volts when not per-unit).
    pub vm: Vec<f64>,

    /// Voltage angle per terminal (radians).
    pub va: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenSolution {
    pub connections: Vec<usize>,
    pub pg: Vec<f64>,
    pub qg: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadSolution {
    pub connections: Vec<usize>,
    pub pd: Vec<f64>,
    pub qd: Vec<f64>,
}

/// Result of one solve. Per-element maps are keyed by element name
/// (buses, loads) or generator id.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    pub termination_status: TerminationStatus,
    pub objective: f64,
    pub solve_time_seconds: f64,
    pub iterations: usize,

    /// Units of the per-element values.
    pub per_unit: bool,

    pub per_bus: BTreeMap<String, BusSolution>,
    pub per_gen: BTreeMap<String, GenSolution>,
    pub per_load: BTreeMap<String, LoadSolution>,

    /// Slack of each model constraint, indexed by constraint reference.
    /// Negative values are violations.
    pub constraint_slack: Vec<f64>,
}

impl RawSolution {
    /// A solution carrying a status and nothing else.
    pub fn empty(termination_status: TerminationStatus) -> Self {
        Self {
            termination_status,
            objective: f64::NAN,
            solve_time_seconds: 0.0,
            iterations: 0,
            per_unit: true,
            per_bus: BTreeMap::new(),
            per_gen: BTreeMap::new(),
            per_load: BTreeMap::new(),
            constraint_slack: Vec::new(),
        }
    }
}
