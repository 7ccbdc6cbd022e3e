use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Instant;

use densetools::Arr;
use num_complex::Complex64;
use sparsetools::csr::CSR;
use spsolve::rlu::RLU;

use crate::debug::{format_f64_vec, format_polar_vec};
use crate::error::OpfError;
use crate::jac::make_jac;
use crate::math::{MathLoad, MathModel};
use crate::model::{Constraint, ModelInstance, Objective, VarKind};
use crate::opt::SolverOptions;
use crate::solution::{BusSolution, GenSolution, LoadSolution, RawSolution, TerminationStatus};
use crate::traits::{LinearSolver, NlpSolver, ProgressMonitor};
use crate::ybus::{make_ybus, NodeIndex};

/// Inequality violations below this are ignored.
const FEASIBILITY_TOL: f64 = 1e-6;

/// Specified complex power injection at each node.
pub trait SBus {
    fn s_bus(&self, vm: &[f64]) -> Vec<Complex64>;

    /// Diagonal of the injection sensitivity w.r.t. voltage magnitude.
    fn d_sbus_d_vm(&self, vm: &[f64]) -> Vec<Complex64>;
}

/// Injections of voltage dependent loads.
struct LoadInjection<'a> {
    loads: &'a [MathLoad],
    index: &'a NodeIndex,

    // Node of each load connection.
    nodes: Vec<Vec<usize>>,
}

impl<'a> LoadInjection<'a> {
    fn new(loads: &'a [MathLoad], index: &'a NodeIndex) -> Result<Self, OpfError> {
        let nodes = loads
            .iter()
            .map(|ld| {
                ld.connections
                    .iter()
                    .map(|&t| {
                        index.get(ld.bus, t).ok_or_else(|| {
                            OpfError::ModelBuild(format!(
                                "load '{}' connects to missing terminal {}",
                                ld.name, t
                            ))
                        })
                    })
                    .collect::<Result<Vec<usize>, OpfError>>()
            })
            .collect::<Result<Vec<_>, OpfError>>()?;
        Ok(Self { loads, index, nodes })
    }
}

impl<'a> SBus for LoadInjection<'a> {
    fn s_bus(&self, vm: &[f64]) -> Vec<Complex64> {
        let mut s = vec![Complex64::default(); self.index.len()];
        for (ld, nodes) in self.loads.iter().zip(&self.nodes) {
            for (k, &n) in nodes.iter().enumerate() {
                s[n] -= ld.demand(k, vm[n]);
            }
        }
        s
    }

    fn d_sbus_d_vm(&self, vm: &[f64]) -> Vec<Complex64> {
        let mut ds = vec![Complex64::default(); self.index.len()];
        for (ld, nodes) in self.loads.iter().zip(&self.nodes) {
            for (k, &n) in nodes.iter().enumerate() {
                ds[n] -= ld.d_demand_d_vm(k, vm[n]);
            }
        }
        ds
    }
}

/// Logs Newton iterations, more verbosely for higher print levels.
pub struct LogProgress {
    pub print_level: usize,
}

impl ProgressMonitor for LogProgress {
    fn update(&self, i: usize, norm_f: f64) {
        match self.print_level {
            0 => {}
            1..=4 => log::debug!("iter {:>3}  |F| = {:.3e}", i, norm_f),
            _ => log::info!("iter {:>3}  |F| = {:.3e}", i, norm_f),
        }
    }
}

fn mismatch(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v: &[Complex64],
    vm: &[f64],
) -> Vec<Complex64> {
    let i_bus = y_bus * v;
    let s = s_bus.s_bus(vm);
    v.iter()
        .zip(i_bus)
        .zip(s)
        .map(|((vi, ii), si)| vi * ii.conj() - si)
        .collect()
}

fn norm_inf(f: &[f64]) -> f64 {
    f.iter().fold(0.0, |m, x| if x.abs() > m || x.is_nan() { x.abs() } else { m })
}

/// Solves the power balance equations at the `pq` nodes using full
/// Newton's method (power/polar). All other nodes are held at `v0`.
///
/// Returns the final voltages, whether the mismatch dropped below `tol`,
/// the number of iterations and the final mismatch norm.
pub(crate) fn newtonpf(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v0: Vec<Complex64>,
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
    options: &SolverOptions,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<Complex64>, bool, usize, f64), OpfError> {
    let tol = options.tol;
    let max_it = options.max_iter;
    let npq = pq.len();

    let mut converged = false;
    let mut i = 0;
    let mut v = v0;
    let mut va: Vec<f64> = v.iter().map(|z| z.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|z| z.norm()).collect();

    let eval = |v: &[Complex64], vm: &[f64]| -> Vec<f64> {
        let mis = mismatch(y_bus, s_bus, v, vm);
        let mut f: Vec<f64> = pq.iter().map(|&k| mis[k].re).collect();
        f.extend(pq.iter().map(|&k| mis[k].im));
        f
    };

    // evaluate F(x0)
    let mut f = eval(&v, &vm);
    let mut norm_f = norm_inf(&f);
    if let Some(pm) = progress {
        pm.update(i, norm_f);
    }
    if norm_f < tol {
        converged = true;
    }

    while !converged && i < max_it {
        if !norm_f.is_finite() {
            return Err(OpfError::LinearSolve(format!(
                "mismatch is not finite at iteration {}",
                i
            )));
        }
        i += 1;

        let jac =
            make_jac(y_bus, &v, &s_bus.d_sbus_d_vm(&vm), pq).map_err(OpfError::LinearSolve)?;
        let mut rhs = Arr::zeros(f.len());
        for (j, f_j) in f.iter().enumerate() {
            rhs[j] = -f_j;
        }
        let dx = lin_solver.solve(jac, &rhs).map_err(OpfError::LinearSolve)?;

        pq.iter().enumerate().for_each(|(j, &k)| va[k] += dx[j]);
        pq.iter().enumerate().for_each(|(j, &k)| vm[k] += dx[npq + j]);

        // update Vm and Va again in case we wrapped around with a negative Vm
        v = vm
            .iter()
            .zip(&va)
            .map(|(&m, &a)| Complex64::from_polar(m, a))
            .collect();
        va = v.iter().map(|z| z.arg()).collect();
        vm = v.iter().map(|z| z.norm()).collect();

        f = eval(&v, &vm);
        norm_f = norm_inf(&f);
        if let Some(pm) = progress {
            pm.update(i, norm_f);
        }
        if norm_f < tol {
            converged = true;
        }
    }

    if !norm_f.is_finite() {
        return Err(OpfError::LinearSolve(format!(
            "mismatch is not finite at iteration {}",
            i
        )));
    }
    Ok((v, converged, i, norm_f))
}

/// Voltage unbalance factor |V2|/|V1| of a three-phase voltage.
pub fn unbalance_factor(va: Complex64, vb: Complex64, vc: Complex64) -> f64 {
    let a = Complex64::from_polar(1.0, 2.0 * PI / 3.0);
    let v1 = (va + a * vb + a * a * vc) / 3.0;
    let v2 = (va + a * a * vb + a * vc) / 3.0;
    if v1.norm() == 0.0 {
        f64::INFINITY
    } else {
        v2.norm() / v1.norm()
    }
}

/// Full Newton-Raphson solver for the polar power balance formulation.
///
/// Nodes held by a generator are fixed at its voltage setpoint, so the
/// solution is the power flow operating point. Inequality constraints in
/// the model are checked once the mismatch has converged.
#[derive(Default)]
pub struct NewtonSolver<L = RLU> {
    pub lin_solver: L,
}

impl NewtonSolver {
    /// Newton's method with sparse LU factorization of the Jacobian.
    pub fn new() -> Self {
        Self {
            lin_solver: RLU::default(),
        }
    }
}

impl<L: LinearSolver> NlpSolver for NewtonSolver<L> {
    fn name(&self) -> &str {
        "newton"
    }

    fn solve(
        &self,
        model: &ModelInstance,
        options: &SolverOptions,
    ) -> Result<RawSolution, OpfError> {
        let start = Instant::now();

        let data = &model.data;
        let index = NodeIndex::new(data);
        let y_bus = make_ybus(data, &index, &self.lin_solver).map_err(OpfError::ModelBuild)?;
        let s_bus = LoadInjection::new(&data.load, &index)?;
        let x0 = initial_point(model, &index)?;

        let mut solution = match self.run(model, &index, &y_bus, &s_bus, x0, options) {
            Ok(solution) => solution,
            Err(err) => {
                log::error!("{}: {}", self.name(), err);
                RawSolution::empty(TerminationStatus::NumericalError)
            }
        };
        solution.solve_time_seconds = start.elapsed().as_secs_f64();
        Ok(solution)
    }
}

// Starting voltages at every node and the indexes of the free nodes.
fn initial_point(
    model: &ModelInstance,
    index: &NodeIndex,
) -> Result<(Vec<Complex64>, Vec<usize>), OpfError> {
    let mut v0 = Vec::with_capacity(index.len());
    let mut pq = Vec::new();
    for (k, &(bus, t)) in index.nodes().iter().enumerate() {
        let (vm, va) = match (model.vm(bus, t), model.va(bus, t)) {
            (Some(vm), Some(va)) => (model.variable(vm), model.variable(va)),
            _ => {
                return Err(OpfError::ModelBuild(format!(
                    "no voltage variables for bus {} terminal {}",
                    bus, t
                )))
            }
        };
        if vm.fixed.is_none() {
            pq.push(k);
        }
        v0.push(Complex64::from_polar(
            vm.fixed.unwrap_or(vm.start),
            va.fixed.unwrap_or(va.start),
        ));
    }
    if pq.len() == index.len() {
        return Err(OpfError::ModelBuild(
            "no reference node: no generator fixes a voltage".to_string(),
        ));
    }
    Ok((v0, pq))
}

impl<L: LinearSolver> NewtonSolver<L> {
    fn run(
        &self,
        model: &ModelInstance,
        index: &NodeIndex,
        y_bus: &CSR<usize, Complex64>,
        s_bus: &LoadInjection,
        (v0, pq): (Vec<Complex64>, Vec<usize>),
        options: &SolverOptions,
    ) -> Result<RawSolution, OpfError> {
        log::debug!("V0: {}", format_polar_vec(&v0));

        let progress = LogProgress {
            print_level: options.print_level,
        };
        let (v, converged, iterations, norm_f) = newtonpf(
            y_bus,
            s_bus,
            v0,
            &pq,
            &self.lin_solver,
            options,
            Some(&progress),
        )?;

        if options.print_level > 0 {
            if converged {
                log::info!(
                    "Newton's method (power balance, polar) converged in {} iterations",
                    iterations
                );
            } else {
                log::info!(
                    "Newton's method (power balance, polar) did not converge in {} iterations",
                    iterations
                );
            }
        }

        let vm: Vec<f64> = v.iter().map(|z| z.norm()).collect();
        let mis = mismatch(y_bus, s_bus, &v, &vm);
        let slack = constraint_slack(model, index, &v, &mis);
        let violated = model
            .constraints()
            .iter()
            .zip(&slack)
            .filter(|(c, s)| c.is_inequality() && **s < -FEASIBILITY_TOL)
            .count();
        if violated > 0 {
            log::debug!("{} inequality constraints violated", violated);
        }

        let termination_status = if converged || norm_f < options.acceptable_tol {
            if violated > 0 {
                TerminationStatus::LocallyInfeasible
            } else if converged {
                TerminationStatus::LocallySolved
            } else {
                TerminationStatus::AlmostLocallySolved
            }
        } else {
            TerminationStatus::IterationLimit
        };

        log::debug!("Vm: {}", format_f64_vec(&vm));

        let mut solution = extract(model, index, y_bus, &v, termination_status);
        solution.iterations = iterations;
        solution.constraint_slack = slack;
        Ok(solution)
    }
}

fn constraint_slack(
    model: &ModelInstance,
    index: &NodeIndex,
    v: &[Complex64],
    mis: &[Complex64],
) -> Vec<f64> {
    let node_v = |bus: usize, t: usize| index.get(bus, t).map(|n| v[n]);

    model
        .constraints()
        .iter()
        .map(|c| match *c {
            Constraint::PowerBalance { bus, terminal } => index
                .get(bus, terminal)
                .map_or(f64::NAN, |n| -mis[n].norm()),
            Constraint::VoltageReference { bus, terminal } => {
                match (node_v(bus, terminal), model.vm(bus, terminal), model.va(bus, terminal)) {
                    (Some(vn), Some(vm), Some(va)) => {
                        let m = model.variable(vm).fixed.unwrap_or(f64::NAN);
                        let a = model.variable(va).fixed.unwrap_or(f64::NAN);
                        -(vn - Complex64::from_polar(m, a)).norm()
                    }
                    _ => f64::NAN,
                }
            }
            Constraint::VariableBound { var, lower, upper } => {
                let x = model.variable(var);
                let value = match node_v(x.bus, x.terminal) {
                    Some(vn) => match x.kind {
                        VarKind::Vm => vn.norm(),
                        VarKind::Va => vn.arg(),
                    },
                    None => f64::NAN,
                };
                (value - lower).min(upper - value)
            }
            Constraint::UnbalanceBound { bus, max } => {
                match (node_v(bus, 1), node_v(bus, 2), node_v(bus, 3)) {
                    (Some(a), Some(b), Some(c)) => max - unbalance_factor(a, b, c),
                    _ => f64::NAN,
                }
            }
        })
        .collect()
}

// Builds the per-element solution at voltages `v`. Values are converted to
// volts and engineering power units when the model's `per_unit` flag is set.
// The objective is always evaluated in engineering power units.
fn extract(
    model: &ModelInstance,
    index: &NodeIndex,
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    termination_status: TerminationStatus,
) -> RawSolution {
    let data: &MathModel = &model.data;
    let make_si = model.per_unit;
    let nan = Complex64::new(f64::NAN, f64::NAN);
    let i_bus = y_bus * v;

    // Engineering power units per p.u.
    let p_scale = data.sbase / data.power_scale_factor;
    let s_scale = if make_si { p_scale } else { 1.0 };

    let mut per_bus = BTreeMap::new();
    for bus in &data.bus {
        let v_scale = if make_si { bus.vbase } else { 1.0 };
        let mut sol = BusSolution {
            terminals: bus.terminals.clone(),
            ..Default::default()
        };
        for &t in &bus.terminals {
            let vn = index.get(bus.index, t).map_or(nan, |n| v[n]);
            sol.vm.push(vn.norm() * v_scale);
            sol.va.push(vn.arg());
        }
        per_bus.insert(bus.name.clone(), sol);
    }

    let mut demand = vec![Complex64::default(); index.len()];
    let mut per_load = BTreeMap::new();
    for ld in &data.load {
        let mut sol = LoadSolution {
            connections: ld.connections.clone(),
            ..Default::default()
        };
        for (k, &t) in ld.connections.iter().enumerate() {
            let sd = match index.get(ld.bus, t) {
                Some(n) => {
                    let sd = ld.demand(k, v[n].norm());
                    demand[n] += sd;
                    sd
                }
                None => nan,
            };
            sol.pd.push(sd.re * s_scale);
            sol.qd.push(sd.im * s_scale);
        }
        per_load.insert(ld.name.clone(), sol);
    }

    let mut objective = 0.0;
    let mut per_gen = BTreeMap::new();
    for (id, gen) in &data.gen {
        let mut sol = GenSolution {
            connections: gen.connections.clone(),
            ..Default::default()
        };
        let mut pg = 0.0;
        for &t in &gen.connections {
            // injection into the network plus any demand at the same node
            let sg = index
                .get(gen.bus, t)
                .map_or(nan, |n| v[n] * i_bus[n].conj() + demand[n]);
            pg += sg.re;
            sol.pg.push(sg.re * s_scale);
            sol.qg.push(sg.im * s_scale);
        }
        if model.objective == Objective::MinGenCost {
            objective += gen.cost_at(pg * p_scale);
        }
        per_gen.insert(id.clone(), sol);
    }

    RawSolution {
        objective,
        per_unit: !make_si,
        per_bus,
        per_gen,
        per_load,
        ..RawSolution::empty(termination_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ModelConstraint, VoltageMagnitudeBound};
    use crate::dss::parse_str;
    use crate::model::{instantiate_model, Formulation};
    use crate::transform::transform;
    use sparsetools::csc::CSC;
    use std::path::Path;

    const FEEDER: &str = "
new circuit.f basekv=0.4 bus1=src
new linecode.lc nphases=3 r1=0.211 x1=0.074 r0=0.634 x0=0.222 units=km
new line.l1 bus1=src.1.2.3 bus2=b1.1.2.3 phases=3 linecode=lc length=100 units=m
new line.l2 bus1=b1.1.2.3 bus2=b2.1.2.3 phases=3 linecode=lc length=100 units=m
new load.ld1 bus1=b1.1 phases=1 kv=0.23 kw=5 kvar=2
new load.ld2 bus1=b2.2 phases=1 kv=0.23 kw=3 kvar=1 model=2
new load.ld3 bus1=b2.3 phases=1 kv=0.23 kw=4 kvar=1 model=5
";

    fn model() -> ModelInstance {
        let eng = parse_str(FEEDER, Path::new("f.dss")).unwrap();
        let mut math = transform(&eng).unwrap();
        if let Some(gen) = math.gen.get_mut("1") {
            gen.cost = vec![1.0, 0.0];
        }
        instantiate_model(math, Formulation::AcPolar, Objective::MinGenCost).unwrap()
    }

    #[test]
    fn test_unbalance_factor() {
        let balanced = [0.0f64, -120.0, 120.0].map(|a| Complex64::from_polar(1.0, a.to_radians()));
        assert!(unbalance_factor(balanced[0], balanced[1], balanced[2]) < 1e-12);

        let vb = Complex64::from_polar(0.9, (-120f64).to_radians());
        let vuf = unbalance_factor(balanced[0], vb, balanced[2]);
        assert!(vuf > 0.01 && vuf < 0.1);
    }

    #[test]
    fn test_newton_solve() -> anyhow::Result<()> {
        let mut m = model();
        m.per_unit = false;
        let sol = NewtonSolver::new().solve(&m, &SolverOptions::default())?;

        assert_eq!(sol.termination_status, TerminationStatus::LocallySolved);
        assert!(sol.iterations > 0 && sol.iterations < 10);
        assert!(sol.per_unit);

        let b2 = &sol.per_bus["b2"];
        assert_eq!(b2.terminals, vec![1, 2, 3]);
        assert!(b2.vm.iter().all(|&vm| vm > 0.9 && vm < 1.05));
        assert!(b2.vm[1] < 1.0);
        let src = &sol.per_bus["src"];
        assert!(src.vm.iter().all(|&vm| (vm - 1.0).abs() < 1e-12));

        // generation covers demand plus losses
        let pd: f64 = sol.per_load.values().flat_map(|l| l.pd.iter()).sum();
        let pg: f64 = sol.per_gen["1"].pg.iter().sum();
        assert!(pg > pd);

        // objective is the linear cost of generation in kW
        assert!((sol.objective - pg * m.data.sbase / m.data.power_scale_factor).abs() < 1e-9);

        assert!(sol.constraint_slack.iter().all(|s| *s > -1e-6));
        Ok(())
    }

    #[test]
    fn test_newton_si_conversion() -> anyhow::Result<()> {
        let m = model();
        assert!(m.per_unit);
        let sol = NewtonSolver::new().solve(&m, &SolverOptions::default())?;
        assert!(!sol.per_unit);
        let vbase = 400.0 / 3f64.sqrt();
        assert!((sol.per_bus["src"].vm[0] - vbase).abs() < 1e-6);
        assert!((sol.per_load["ld1"].pd[0] - 5.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_newton_infeasible_bounds() -> anyhow::Result<()> {
        let mut m = model();
        VoltageMagnitudeBound {
            lower: 1.2,
            upper: 1.1,
        }
        .apply(&mut m)?;
        let sol = NewtonSolver::new().solve(&m, &SolverOptions::default())?;
        assert_eq!(sol.termination_status, TerminationStatus::LocallyInfeasible);
        Ok(())
    }

    #[test]
    fn test_newton_iteration_limit() -> anyhow::Result<()> {
        let m = model();
        let options = SolverOptions {
            max_iter: 1,
            tol: 1e-14,
            acceptable_tol: 1e-14,
            ..SolverOptions::default()
        };
        let sol = NewtonSolver::new().solve(&m, &options)?;
        assert_eq!(sol.termination_status, TerminationStatus::IterationLimit);
        assert_eq!(sol.iterations, 1);

        let options = SolverOptions {
            max_iter: 2,
            tol: 0.0,
            acceptable_tol: 1e-3,
            ..SolverOptions::default()
        };
        let sol = NewtonSolver::new().solve(&m, &options)?;
        assert_eq!(sol.termination_status, TerminationStatus::AlmostLocallySolved);
        Ok(())
    }

    // Factorizes the 6 x 6 real form of each branch impedance but rejects
    // the larger Newton Jacobian.
    struct SingularJacobian;

    impl LinearSolver for SingularJacobian {
        fn solve(&self, a_mat: CSC<usize, f64>, b: &Arr<f64>) -> Result<Arr<f64>, String> {
            if a_mat.cols() > 6 {
                return Err("singular".to_string());
            }
            LinearSolver::solve(&RLU::default(), a_mat, b)
        }
    }

    #[test]
    fn test_newton_numerical_error() -> anyhow::Result<()> {
        let solver = NewtonSolver {
            lin_solver: SingularJacobian,
        };
        let sol = solver.solve(&model(), &SolverOptions::default())?;
        assert_eq!(sol.termination_status, TerminationStatus::NumericalError);
        assert!(sol.per_bus.is_empty());
        Ok(())
    }

    #[test]
    fn test_newton_singular_branch() {
        let text = FEEDER.replace(
            "new line.l2 bus1=b1.1.2.3 bus2=b2.1.2.3 phases=3 linecode=lc length=100 units=m",
            "new line.l2 bus1=b1.1.2.3 bus2=b2.1.2.3 phases=3 r1=0 x1=0 r0=0 x0=0",
        );
        let eng = parse_str(&text, Path::new("f.dss")).unwrap();
        let math = transform(&eng).unwrap();
        let m = instantiate_model(math, Formulation::AcPolar, Objective::Feasibility).unwrap();

        let result = NewtonSolver::new().solve(&m, &SolverOptions::default());
        match result {
            Err(OpfError::ModelBuild(msg)) => assert!(msg.contains("l2")),
            other => panic!("expected a model build error, got {:?}", other.map(|s| s.termination_status)),
        }
    }
}
