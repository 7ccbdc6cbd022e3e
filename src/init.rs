use crate::eng::EngineeringModel;
use crate::error::{OpfError, Result};
use crate::math::MathModel;
use crate::model::{instantiate_model, Formulation, ModelInstance, Objective};
use crate::opt::Configuration;
use crate::transform::transform;

/// Linear cost `1.0 * pg + 0.0`, highest order first.
pub const LINEAR_COST: [f64; 2] = [1.0, 0.0];

/// Prepares an OPF model instance from a parsed network.
///
/// Writes the configured base power and scale factor into the network
/// settings, converts it to per-unit, gives the configured generator a
/// linear cost and instantiates an unbalanced AC polar model that minimises
/// generation cost. Solutions of the returned instance stay in per-unit.
pub fn initialize(
    eng: &mut EngineeringModel,
    config: &Configuration,
) -> Result<(ModelInstance, MathModel)> {
    eng.settings.sbase_default = config.base_power;
    eng.settings.power_scale_factor = config.power_scale_factor;

    let mut math = transform(eng)?;
    log::debug!(
        "math model '{}': {} buses, {} branches, {} loads",
        math.name,
        math.bus.len(),
        math.branch.len(),
        math.load.len()
    );

    let gen = math
        .gen
        .get_mut(&config.generator_id)
        .ok_or_else(|| OpfError::MissingGenerator(config.generator_id.clone()))?;
    gen.cost = LINEAR_COST.to_vec();

    let mut model = instantiate_model(math.clone(), Formulation::AcPolar, Objective::MinGenCost)?;
    model.per_unit = false;

    Ok((model, math))
}
