use std::collections::BTreeMap;

use num_complex::Complex64;

use crate::dense::Mat;
use crate::eng::LoadModel;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// MathModel is the per-unit model of an unbalanced network. Buses are
/// numbered consecutively from 0 in ascending name order.
#[derive(Debug, Clone)]
pub struct MathModel {
    pub name: String,

    /// Per-phase base power (VA).
    pub sbase: f64,

    /// Power unit used by the engineering data, in watts.
    pub power_scale_factor: f64,

    pub bus: Vec<MathBus>,
    pub branch: Vec<MathBranch>,
    pub load: Vec<MathLoad>,

    /// Generators keyed by id. The voltage source is generator "1".
    pub gen: BTreeMap<String, MathGen>,

    /// Index of the reference (source) bus.
    pub ref_bus: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MathBus {
    pub index: usize,
    pub name: String,

    /// Connected phase terminals, ascending.
    pub terminals: Vec<usize>,

    /// Phase-to-neutral base voltage (V).
    pub vbase: f64,
}

#[derive(Debug, Clone)]
pub struct MathBranch {
    pub name: String,
    pub f_bus: usize,
    pub t_bus: usize,

    /// Terminal of each conductor at the from/to ends.
    pub f_connections: Vec<usize>,
    pub t_connections: Vec<usize>,

    /// Series impedance (p.u.), one row/column per conductor.
    pub z: Mat<Complex64>,
}

#[derive(Debug, Clone)]
pub struct MathLoad {
    pub name: String,
    pub bus: usize,
    pub connections: Vec<usize>,

    /// Demand per connection at nominal voltage (p.u.).
    pub sd: Vec<Complex64>,

    /// Nominal phase-to-neutral voltage (p.u.).
    pub vnom: f64,

    pub model: LoadModel,
}

#[derive(Debug, Clone)]
pub struct MathGen {
    pub id: String,
    pub name: String,
    pub bus: usize,
    pub connections: Vec<usize>,

    /// Voltage magnitude setpoints (p.u.).
    pub vg: Vec<f64>,

    /// Voltage angle setpoints (radians).
    pub va: Vec<f64>,

    /// Polynomial cost coefficients, highest order first.
    pub cost: Vec<f64>,
}

impl MathGen {
    /// Evaluates the cost polynomial at `p`.
    pub fn cost_at(&self, p: f64) -> f64 {
        self.cost.iter().fold(0.0, |acc, c| acc * p + c)
    }
}

impl MathModel {
    pub fn bus_by_name(&self, name: &str) -> Option<&MathBus> {
        self.bus.iter().find(|b| b.name == name)
    }

    /// All (bus, terminal) pairs in bus order.
    pub fn nodes(&self) -> Vec<(usize, usize)> {
        self.bus
            .iter()
            .flat_map(|b| b.terminals.iter().map(move |&t| (b.index, t)))
            .collect()
    }
}
