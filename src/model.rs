use std::f64::consts::PI;

use crate::error::{OpfError, Result};
use crate::math::MathModel;

/// Network formulation of an instantiated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formulation {
    /// Unbalanced AC power flow with node voltages in polar coordinates.
    AcPolar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Minimise the polynomial cost of generator active power.
    MinGenCost,
    /// No objective, only a feasible operating point is sought.
    Feasibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Voltage magnitude (p.u.).
    Vm,
    /// Voltage angle (radians).
    Va,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    pub bus: usize,
    pub terminal: usize,
    pub lower: Option<f64>,
    pub upper: Option<f64>,

    /// Fixed value, if the variable is not free.
    pub fixed: Option<f64>,

    pub start: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Kirchhoff's current law at a free node, in power form.
    PowerBalance { bus: usize, terminal: usize },
    /// Voltage at a node held by a generator setpoint.
    VoltageReference { bus: usize, terminal: usize },
    /// `lower <= x <= upper`
    VariableBound { var: VarRef, lower: f64, upper: f64 },
    /// Negative over positive sequence voltage magnitude at a three-phase bus.
    UnbalanceBound { bus: usize, max: f64 },
}

impl Constraint {
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Constraint::VariableBound { .. } | Constraint::UnbalanceBound { .. }
        )
    }
}

/// An optimisation problem instantiated from a math model: the network
/// data plus decision variables and constraints.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    pub formulation: Formulation,
    pub objective: Objective,
    pub data: MathModel,

    /// The data is in per-unit and solutions are converted back to volts and
    /// engineering power units. Cleared to keep solutions in per-unit.
    pub per_unit: bool,

    variables: Vec<Variable>,
    constraints: Vec<Constraint>,

    // Variables per bus, in terminal order.
    vm: Vec<Vec<VarRef>>,
    va: Vec<Vec<VarRef>>,
}

impl ModelInstance {
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, var: VarRef) -> &Variable {
        &self.variables[var.0]
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, c: ConstraintRef) -> &Constraint {
        &self.constraints[c.0]
    }

    pub fn n_bus(&self) -> usize {
        self.data.bus.len()
    }

    pub fn bus_name(&self, bus: usize) -> &str {
        &self.data.bus[bus].name
    }

    pub fn bus_terminals(&self, bus: usize) -> &[usize] {
        &self.data.bus[bus].terminals
    }

    /// Voltage magnitude variable of `terminal` at `bus`.
    pub fn vm(&self, bus: usize, terminal: usize) -> Option<VarRef> {
        let k = self.terminal_position(bus, terminal)?;
        Some(self.vm[bus][k])
    }

    /// Voltage angle variable of `terminal` at `bus`.
    pub fn va(&self, bus: usize, terminal: usize) -> Option<VarRef> {
        let k = self.terminal_position(bus, terminal)?;
        Some(self.va[bus][k])
    }

    fn terminal_position(&self, bus: usize, terminal: usize) -> Option<usize> {
        self.data
            .bus
            .get(bus)?
            .terminals
            .iter()
            .position(|&t| t == terminal)
    }

    pub fn add_constraint(&mut self, c: Constraint) -> ConstraintRef {
        self.constraints.push(c);
        ConstraintRef(self.constraints.len() - 1)
    }

    /// Replaces the bounds of a variable.
    pub fn set_bounds(&mut self, var: VarRef, lower: Option<f64>, upper: Option<f64>) {
        let v = &mut self.variables[var.0];
        v.lower = lower;
        v.upper = upper;
    }

    fn add_variable(&mut self, v: Variable) -> VarRef {
        self.variables.push(v);
        VarRef(self.variables.len() - 1)
    }
}

/// Instantiates an optimisation model of the given formulation over `data`.
///
/// Every node gets a voltage magnitude variable (bounded below by zero) and
/// an angle variable. Nodes connected to a generator are fixed at its
/// voltage setpoint; all other nodes get a power balance constraint.
pub fn instantiate_model(
    data: MathModel,
    formulation: Formulation,
    objective: Objective,
) -> Result<ModelInstance> {
    if data.bus.is_empty() {
        return Err(OpfError::ModelBuild("network has no buses".to_string()));
    }

    let n_bus = data.bus.len();
    let mut model = ModelInstance {
        formulation,
        objective,
        data,
        per_unit: true,
        variables: Vec::new(),
        constraints: Vec::new(),
        vm: vec![Vec::new(); n_bus],
        va: vec![Vec::new(); n_bus],
    };

    let angle0 = reference_angle(&model.data);
    for b in 0..n_bus {
        let (name, terminals) = {
            let bus = &model.data.bus[b];
            (bus.name.clone(), bus.terminals.clone())
        };
        for t in terminals {
            let vm = model.add_variable(Variable {
                name: format!("vm[{}.{}]", name, t),
                kind: VarKind::Vm,
                bus: b,
                terminal: t,
                lower: Some(0.0),
                upper: None,
                fixed: None,
                start: 1.0,
            });
            let va = model.add_variable(Variable {
                name: format!("va[{}.{}]", name, t),
                kind: VarKind::Va,
                bus: b,
                terminal: t,
                lower: None,
                upper: None,
                fixed: None,
                start: angle0 - 2.0 * PI / 3.0 * (t as f64 - 1.0),
            });
            model.vm[b].push(vm);
            model.va[b].push(va);
        }
    }

    let gens: Vec<_> = model.data.gen.values().cloned().collect();
    for gen in &gens {
        if gen.vg.len() != gen.connections.len() || gen.va.len() != gen.connections.len() {
            return Err(OpfError::ModelBuild(format!(
                "generator '{}' has {} connections but {} magnitude and {} angle setpoints",
                gen.id,
                gen.connections.len(),
                gen.vg.len(),
                gen.va.len()
            )));
        }
        for (k, &t) in gen.connections.iter().enumerate() {
            let (vm, va) = match (model.vm(gen.bus, t), model.va(gen.bus, t)) {
                (Some(vm), Some(va)) => (vm, va),
                _ => {
                    return Err(OpfError::ModelBuild(format!(
                        "generator '{}' connects to terminal {} which bus {} does not have",
                        gen.id, t, gen.bus
                    )))
                }
            };
            model.variables[vm.0].fixed = Some(gen.vg[k]);
            model.variables[vm.0].start = gen.vg[k];
            model.variables[va.0].fixed = Some(gen.va[k]);
            model.variables[va.0].start = gen.va[k];
            model.add_constraint(Constraint::VoltageReference { bus: gen.bus, terminal: t });
        }
    }

    for (bus, terminal) in model.data.nodes() {
        let fixed = model
            .vm(bus, terminal)
            .map_or(false, |vm| model.variable(vm).fixed.is_some());
        if !fixed {
            model.add_constraint(Constraint::PowerBalance { bus, terminal });
        }
    }

    log::debug!(
        "instantiated {:?} model: {} variables, {} constraints",
        formulation,
        model.variables.len(),
        model.constraints.len()
    );
    Ok(model)
}

// Angle of terminal 1 at the reference bus, used to warm start the angles.
fn reference_angle(data: &MathModel) -> f64 {
    data.gen
        .values()
        .filter(|g| g.bus == data.ref_bus)
        .find_map(|g| {
            g.connections
                .iter()
                .position(|&t| t == 1)
                .and_then(|k| g.va.get(k).copied())
        })
        .unwrap_or(0.0)
}
