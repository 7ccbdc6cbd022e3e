use std::collections::BTreeMap;

use crate::error::{OpfError, Result};
use crate::model::{Constraint, ConstraintRef, ModelInstance};
use crate::opt::Configuration;

/// Constraint references keyed by (bus index, phase).
pub type ConstraintKeys = BTreeMap<(usize, usize), ConstraintRef>;

const THREE_PHASE: [usize; 3] = [1, 2, 3];

/// A family of constraints added to an instantiated model.
pub trait ModelConstraint: Send + Sync {
    /// Unique name, used to look up the applied keys.
    fn name(&self) -> &str;

    /// Adds the constraints to `model`, returning the references created.
    fn apply(&self, model: &mut ModelInstance) -> Result<ConstraintKeys>;
}

/// Bounds every phase voltage magnitude of every bus to
/// `lower <= vm <= upper`.
///
/// All buses must have exactly the terminals 1, 2 and 3. The model is left
/// untouched when one does not.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageMagnitudeBound {
    pub lower: f64,
    pub upper: f64,
}

impl ModelConstraint for VoltageMagnitudeBound {
    fn name(&self) -> &str {
        "voltage_magnitude_bound"
    }

    fn apply(&self, model: &mut ModelInstance) -> Result<ConstraintKeys> {
        for bus in 0..model.n_bus() {
            let terminals = model.bus_terminals(bus);
            if terminals != THREE_PHASE {
                return Err(OpfError::UnknownBusPhase {
                    bus: model.bus_name(bus).to_string(),
                    phases: terminals.to_vec(),
                });
            }
        }

        let mut keys = ConstraintKeys::new();
        for bus in 0..model.n_bus() {
            for phase in THREE_PHASE {
                let var = model.vm(bus, phase).ok_or_else(|| OpfError::UnknownBusPhase {
                    bus: model.bus_name(bus).to_string(),
                    phases: vec![phase],
                })?;
                model.set_bounds(var, Some(self.lower), Some(self.upper));
                let c = model.add_constraint(Constraint::VariableBound {
                    var,
                    lower: self.lower,
                    upper: self.upper,
                });
                keys.insert((bus, phase), c);
            }
        }
        log::debug!(
            "{}: {} <= vm <= {} on {} nodes",
            self.name(),
            self.lower,
            self.upper,
            keys.len()
        );
        Ok(keys)
    }
}

/// Limits the voltage unbalance factor |V2|/|V1| at every three-phase bus.
/// Keys use phase 0.
#[derive(Debug, Clone, PartialEq)]
pub struct UnbalanceFactorBound {
    pub max: f64,
}

impl ModelConstraint for UnbalanceFactorBound {
    fn name(&self) -> &str {
        "unbalance_factor_bound"
    }

    fn apply(&self, model: &mut ModelInstance) -> Result<ConstraintKeys> {
        let mut keys = ConstraintKeys::new();
        for bus in 0..model.n_bus() {
            if model.bus_terminals(bus) != THREE_PHASE {
                log::debug!("{}: skipping bus {}", self.name(), model.bus_name(bus));
                continue;
            }
            let c = model.add_constraint(Constraint::UnbalanceBound { bus, max: self.max });
            keys.insert((bus, 0), c);
        }
        Ok(keys)
    }
}

/// Ordered collection of model constraints. Applying the registry records
/// the keys each constraint created under its name, so names are unique.
#[derive(Default)]
pub struct ConstraintRegistry {
    constraints: Vec<Box<dyn ModelConstraint>>,
    keys: BTreeMap<String, ConstraintKeys>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The constraints implied by a configuration: phase voltage bounds,
    /// plus an unbalance factor bound when one is set.
    pub fn from_config(config: &Configuration) -> Self {
        let mut constraints: Vec<Box<dyn ModelConstraint>> = vec![Box::new(VoltageMagnitudeBound {
            lower: config.voltage_lower_bound,
            upper: config.voltage_upper_bound,
        })];
        if let Some(max) = config.unbalance_bound {
            constraints.push(Box::new(UnbalanceFactorBound { max }));
        }
        Self {
            constraints,
            ..Self::default()
        }
    }

    /// Adds a constraint to be applied after those already registered.
    /// Fails if a constraint with the same name is registered.
    pub fn register(&mut self, constraint: Box<dyn ModelConstraint>) -> Result<()> {
        if self.constraints.iter().any(|c| c.name() == constraint.name()) {
            return Err(OpfError::InvalidConfig(format!(
                "constraint '{}' is already registered",
                constraint.name()
            )));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Applies all constraints in registration order.
    pub fn apply_all(&mut self, model: &mut ModelInstance) -> Result<()> {
        for c in &self.constraints {
            let keys = c.apply(model)?;
            self.keys.insert(c.name().to_string(), keys);
        }
        Ok(())
    }

    pub fn keys(&self, name: &str) -> Option<&ConstraintKeys> {
        self.keys.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dss::parse_str;
    use crate::model::{instantiate_model, Formulation, Objective};
    use crate::opt::ConfigurationBuilder;
    use crate::transform::transform;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const THREE_BUS: &str = "
new circuit.c basekv=0.4 bus1=src
new line.l1 bus1=src.1.2.3 bus2=b1.1.2.3 phases=3 r1=0.1 x1=0.1 r0=0.3 x0=0.3
new line.l2 bus1=b1.1.2.3 bus2=b2.1.2.3 phases=3 r1=0.1 x1=0.1 r0=0.3 x0=0.3
new load.ld bus1=b2.1 phases=1 kv=0.23 kw=2 kvar=1
";

    const LATERAL: &str = "
new circuit.c basekv=0.4 bus1=src
new line.l1 bus1=src.1.2.3 bus2=b1.1.2.3 phases=3 r1=0.1 x1=0.1 r0=0.3 x0=0.3
new line.l2 bus1=b1.2 bus2=lat.2 phases=1 r1=0.1 x1=0.1 r0=0.3 x0=0.3
";

    fn model(text: &str) -> ModelInstance {
        let eng = parse_str(text, Path::new("c.dss")).unwrap();
        let math = transform(&eng).unwrap();
        instantiate_model(math, Formulation::AcPolar, Objective::MinGenCost).unwrap()
    }

    #[test]
    fn test_voltage_bound() -> anyhow::Result<()> {
        let mut m = model(THREE_BUS);
        let n0 = m.constraints().len();
        let keys = VoltageMagnitudeBound {
            lower: 0.94,
            upper: 1.1,
        }
        .apply(&mut m)?;

        assert_eq!(keys.len(), 9);
        assert_eq!(m.constraints().len(), n0 + 9);
        let order: Vec<(usize, usize)> = keys.keys().copied().collect();
        assert_eq!(order[0], (0, 1));
        assert_eq!(order[8], (2, 3));

        let var = m.vm(1, 2).unwrap();
        assert_eq!(m.variable(var).lower, Some(0.94));
        assert_eq!(m.variable(var).upper, Some(1.1));
        match m.constraint(keys[&(1, 2)]) {
            Constraint::VariableBound { var: v, lower, upper } => {
                assert_eq!(*v, var);
                assert_eq!((*lower, *upper), (0.94, 1.1));
            }
            c => panic!("unexpected constraint {:?}", c),
        }
        Ok(())
    }

    #[test]
    fn test_voltage_bound_unknown_phase() {
        let mut m = model(LATERAL);
        let n0 = m.constraints().len();
        let err = VoltageMagnitudeBound {
            lower: 0.94,
            upper: 1.1,
        }
        .apply(&mut m)
        .unwrap_err();
        match err {
            OpfError::UnknownBusPhase { bus, phases } => {
                assert_eq!(bus, "lat");
                assert_eq!(phases, vec![2]);
            }
            e => panic!("unexpected error {:?}", e),
        }
        assert_eq!(m.constraints().len(), n0);
    }

    #[test]
    fn test_unbalance_bound() -> anyhow::Result<()> {
        let mut m = model(LATERAL);
        let keys = UnbalanceFactorBound { max: 0.02 }.apply(&mut m)?;
        assert_eq!(keys.len(), 2);
        assert!(keys.keys().all(|&(_, phase)| phase == 0));
        Ok(())
    }

    #[test]
    fn test_registry_from_config() -> anyhow::Result<()> {
        let config = ConfigurationBuilder::default().unbalance_bound(0.02).build()?;
        let mut registry = ConstraintRegistry::from_config(&config);
        assert_eq!(
            registry.names(),
            vec!["voltage_magnitude_bound", "unbalance_factor_bound"]
        );

        let mut m = model(THREE_BUS);
        registry.apply_all(&mut m)?;
        assert_eq!(registry.keys("voltage_magnitude_bound").map(|k| k.len()), Some(9));
        assert_eq!(registry.keys("unbalance_factor_bound").map(|k| k.len()), Some(3));
        assert!(registry.keys("missing").is_none());
        Ok(())
    }

    struct CountingConstraint {
        calls: Arc<AtomicUsize>,
    }

    impl ModelConstraint for CountingConstraint {
        fn name(&self) -> &str {
            "counting"
        }

        fn apply(&self, model: &mut ModelInstance) -> Result<ConstraintKeys> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let var = model.vm(0, 1).unwrap();
            let c = model.add_constraint(Constraint::VariableBound {
                var,
                lower: 0.0,
                upper: 2.0,
            });
            Ok(ConstraintKeys::from([((0, 1), c)]))
        }
    }

    #[test]
    fn test_registry_custom_constraint() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ConstraintRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(CountingConstraint {
            calls: calls.clone(),
        }))?;
        assert_eq!(registry.len(), 1);

        let mut m = model(THREE_BUS);
        registry.apply_all(&mut m)?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.keys("counting").map(|k| k.len()), Some(1));
        Ok(())
    }

    #[test]
    fn test_registry_duplicate_name() -> anyhow::Result<()> {
        let mut registry = ConstraintRegistry::from_config(&Configuration::default());
        let err = registry
            .register(Box::new(VoltageMagnitudeBound {
                lower: 0.9,
                upper: 1.1,
            }))
            .unwrap_err();
        assert!(matches!(err, OpfError::InvalidConfig(_)));
        assert_eq!(registry.len(), 1);

        // the first registration keeps its keys
        let mut m = model(THREE_BUS);
        registry.apply_all(&mut m)?;
        let keys = registry.keys("voltage_magnitude_bound").unwrap();
        match m.constraint(keys[&(0, 1)]) {
            Constraint::VariableBound { lower, upper, .. } => {
                assert_eq!((*lower, *upper), (0.94, 1.1));
            }
            c => panic!("unexpected constraint {:?}", c),
        }
        Ok(())
    }
}
