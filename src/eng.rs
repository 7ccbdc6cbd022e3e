use std::collections::BTreeMap;

/// EngineeringModel is a parsed circuit description in engineering units
/// (kV, kW, ohms). It is converted into a per-unit [`MathModel`](crate::MathModel)
/// by [`transform`](crate::transform).
#[derive(Debug, Clone, Default)]
pub struct EngineeringModel {
    /// Circuit name.
    pub name: String,

    pub settings: Settings,

    /// Voltage source feeding the circuit. `None` until a `new circuit`
    /// command has been read.
    pub source: Option<VoltageSource>,

    pub linecodes: BTreeMap<String, LineCode>,

    /// Lines in declaration order.
    pub lines: Vec<Line>,

    /// Loads in declaration order.
    pub loads: Vec<Load>,

    /// Voltage bases (kV, line-to-line) from `set voltagebases`.
    pub voltage_bases: Vec<f64>,
}

/// Base values applied during the per-unit transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Per-phase base power in units of `power_scale_factor` watts.
    pub sbase_default: f64,

    /// Watts per engineering power unit.
    pub power_scale_factor: f64,

    /// Volts per engineering voltage unit.
    pub voltage_scale_factor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sbase_default: 1.0,
            power_scale_factor: 1000.0,
            voltage_scale_factor: 1000.0,
        }
    }
}

impl Settings {
    /// Per-phase base power in watts.
    pub fn sbase_watts(&self) -> f64 {
        self.sbase_default * self.power_scale_factor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSource {
    pub bus: BusRef,

    /// Nominal line-to-line voltage (kV).
    pub basekv: f64,

    /// Voltage magnitude setpoint (p.u.).
    pub pu: f64,

    /// Phase a angle (degrees).
    pub angle: f64,

    pub phases: usize,
}

/// A bus name with an optional explicit terminal list, e.g. `b1.1.2.3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRef {
    pub name: String,
    pub terminals: Vec<usize>,
}

impl BusRef {
    /// Terminals connected to conductors `1..=n`, with OpenDSS defaults for
    /// references that omit them. Ground (terminal 0) is dropped.
    pub fn conductors(&self, n: usize) -> Vec<usize> {
        if self.terminals.is_empty() {
            (1..=n).collect()
        } else {
            self.terminals
                .iter()
                .copied()
                .take(n)
                .filter(|&t| t != 0)
                .collect()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    None,
    Km,
    M,
    Ft,
    Mi,
    Kft,
}

impl LengthUnit {
    /// Length of one unit in metres.
    pub fn metres(&self) -> f64 {
        match self {
            LengthUnit::None | LengthUnit::M => 1.0,
            LengthUnit::Km => 1000.0,
            LengthUnit::Ft => 0.3048,
            LengthUnit::Mi => 1609.344,
            LengthUnit::Kft => 304.8,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(LengthUnit::None),
            "km" => Some(LengthUnit::Km),
            "m" => Some(LengthUnit::M),
            "ft" => Some(LengthUnit::Ft),
            "mi" => Some(LengthUnit::Mi),
            "kft" => Some(LengthUnit::Kft),
            _ => None,
        }
    }
}

/// Series impedance data, either as sequence values or full matrices
/// (ohms per unit length).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Impedance {
    pub r1: Option<f64>,
    pub x1: Option<f64>,
    pub r0: Option<f64>,
    pub x0: Option<f64>,

    /// Lower-triangular rows, as written in the circuit file.
    pub rmatrix: Option<Vec<Vec<f64>>>,
    pub xmatrix: Option<Vec<Vec<f64>>>,
}

impl Impedance {
    pub fn is_empty(&self) -> bool {
        self.r1.is_none()
            && self.x1.is_none()
            && self.r0.is_none()
            && self.x0.is_none()
            && self.rmatrix.is_none()
            && self.xmatrix.is_none()
    }

    /// Overlays the values set in `other` on top of `self`.
    pub fn merged(&self, other: &Impedance) -> Impedance {
        Impedance {
            r1: other.r1.or(self.r1),
            x1: other.x1.or(self.x1),
            r0: other.r0.or(self.r0),
            x0: other.x0.or(self.x0),
            rmatrix: other.rmatrix.clone().or_else(|| self.rmatrix.clone()),
            xmatrix: other.xmatrix.clone().or_else(|| self.xmatrix.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCode {
    pub name: String,
    pub nphases: usize,
    pub z: Impedance,
    pub units: LengthUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub name: String,
    pub bus1: BusRef,
    pub bus2: BusRef,
    pub phases: usize,
    pub linecode: Option<String>,
    pub length: f64,

    /// Unit of `length`. `None` means the line code's unit.
    pub units: Option<LengthUnit>,

    /// Line-level impedance values, overriding the line code.
    pub z: Impedance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Wye,
    Delta,
}

/// Voltage dependence of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadModel {
    /// Constant P and Q (OpenDSS model 1).
    ConstantPower,
    /// Constant impedance (model 2).
    ConstantImpedance,
    /// Constant current magnitude (model 5).
    ConstantCurrent,
}

impl LoadModel {
    pub fn from_code(code: usize) -> Option<Self> {
        match code {
            1 => Some(LoadModel::ConstantPower),
            2 => Some(LoadModel::ConstantImpedance),
            5 => Some(LoadModel::ConstantCurrent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub name: String,
    pub bus1: BusRef,
    pub phases: usize,

    /// Rated voltage (kV). Line-to-neutral for single-phase loads,
    /// line-to-line otherwise.
    pub kv: f64,

    /// Total real power demand (kW).
    pub kw: f64,

    /// Total reactive power demand (kvar).
    pub kvar: f64,

    pub model: LoadModel,
    pub conn: Connection,
}
