use num_complex::Complex64;

use crate::eng::LoadModel;
use crate::math::MathLoad;

impl LoadModel {
    /// Exponent of the voltage dependence `S = S0 (|V|/Vnom)^k`.
    pub fn exponent(&self) -> f64 {
        match self {
            LoadModel::ConstantPower => 0.0,
            LoadModel::ConstantCurrent => 1.0,
            LoadModel::ConstantImpedance => 2.0,
        }
    }
}

impl MathLoad {
    /// Complex demand of connection `k` at voltage magnitude `vm` (p.u.).
    pub fn demand(&self, k: usize, vm: f64) -> Complex64 {
        let e = self.model.exponent();
        if e == 0.0 {
            self.sd[k]
        } else {
            self.sd[k] * (vm / self.vnom).powf(e)
        }
    }

    /// Derivative of the demand of connection `k` with respect to `vm`.
    pub fn d_demand_d_vm(&self, k: usize, vm: f64) -> Complex64 {
        let e = self.model.exponent();
        if e == 0.0 {
            Complex64::new(0.0, 0.0)
        } else {
            self.sd[k] * e * (vm / self.vnom).powf(e - 1.0) / self.vnom
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(model: LoadModel) -> MathLoad {
        MathLoad {
            name: "ld".to_string(),
            bus: 0,
            connections: vec![1],
            sd: vec![Complex64::new(2.0, 1.0)],
            vnom: 1.0,
            model,
        }
    }

    #[test]
    fn test_demand() {
        let p = load(LoadModel::ConstantPower);
        assert_eq!(p.demand(0, 0.9), Complex64::new(2.0, 1.0));
        assert_eq!(p.d_demand_d_vm(0, 0.9), Complex64::new(0.0, 0.0));

        let z = load(LoadModel::ConstantImpedance);
        assert!((z.demand(0, 0.9) - Complex64::new(2.0, 1.0) * 0.81).norm() < 1e-12);
        assert!((z.d_demand_d_vm(0, 0.9) - Complex64::new(2.0, 1.0) * 1.8).norm() < 1e-12);

        let i = load(LoadModel::ConstantCurrent);
        assert!((i.demand(0, 0.9) - Complex64::new(1.8, 0.9)).norm() < 1e-12);
    }
}
