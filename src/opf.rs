use std::path::Path;

use crate::constraint::ConstraintRegistry;
use crate::dss::parse_file;
use crate::error::Result;
use crate::init::initialize;
use crate::model::ModelInstance;
use crate::newton::NewtonSolver;
use crate::opt::{configure, Configuration};
use crate::result::{format, ResultTable};
use crate::solution::RawSolution;
use crate::traits::NlpSolver;

/// Runs an unbalanced AC OPF on the network file at `path`.
///
/// Phase voltages are bounded by the configured limits (and the unbalance
/// factor, when set) and the problem is solved by [`NewtonSolver`].
/// A solve that does not converge is not an error: check
/// `termination_status` on the returned solution.
pub fn solve_opf(
    path: &Path,
    config: &Configuration,
) -> Result<(RawSolution, ModelInstance, ResultTable)> {
    let mut registry = ConstraintRegistry::from_config(config);
    solve_opf_with(path, config, &mut registry, &NewtonSolver::new())
}

/// Runs an OPF with caller supplied constraints and solver.
///
/// The keys of every applied constraint are available from `registry`
/// afterwards.
pub fn solve_opf_with(
    path: &Path,
    config: &Configuration,
    registry: &mut ConstraintRegistry,
    solver: &dyn NlpSolver,
) -> Result<(RawSolution, ModelInstance, ResultTable)> {
    if config.check_bounds {
        config.validate()?;
    }

    log::info!("Parsing network {}", path.display());
    let mut eng = parse_file(path)?;

    log::debug!("Initializing model");
    let (mut model, _) = initialize(&mut eng, config)?;

    log::debug!("Applying constraints: {:?}", registry.names());
    registry.apply_all(&mut model)?;

    let options = configure(config);
    log::info!(
        "Solving with {} ({} variables, {} constraints)",
        solver.name(),
        model.variables().len(),
        model.constraints().len()
    );
    let raw = solver.solve(&model, &options)?;
    log::info!(
        "Solver finished: {} after {} iterations",
        raw.termination_status,
        raw.iterations
    );

    let table = format(&raw);
    Ok((raw, model, table))
}
