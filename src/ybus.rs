use std::collections::{BTreeMap, HashMap};

use densetools::Arr;
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

use crate::dense::Mat;
use crate::math::MathModel;
use crate::traits::LinearSolver;

/// Consecutive numbering of the (bus, terminal) nodes of a math model.
#[derive(Debug, Clone)]
pub struct NodeIndex {
    nodes: Vec<(usize, usize)>,
    lookup: HashMap<(usize, usize), usize>,
}

impl NodeIndex {
    pub fn new(math: &MathModel) -> Self {
        let nodes = math.nodes();
        let lookup = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        Self { nodes, lookup }
    }

    pub fn get(&self, bus: usize, terminal: usize) -> Option<usize> {
        self.lookup.get(&(bus, terminal)).copied()
    }

    pub fn nodes(&self) -> &[(usize, usize)] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Relative residual of `Z Y - I` above which `Z` is treated as singular.
const RESIDUAL_TOL: f64 = 1e-8;

/// Series admittance `Y = Z^-1` of a branch.
///
/// `Z Y = I` is solved one column at a time in its real form:
///
/// ```text
/// | R  -X |   | Yr |   | e_k |
/// |       | * |    | = |     |
/// | X   R |   | Yi |   |  0  |
/// ```
pub fn branch_admittance(
    z: &Mat<Complex64>,
    lin_solver: &dyn LinearSolver,
) -> Result<Mat<Complex64>, String> {
    let n = z.rows();
    if z.cols() != n {
        return Err(format!("impedance matrix is not square ({} x {})", n, z.cols()));
    }
    if z.values().iter().all(|z_ij| z_ij.norm() == 0.0) {
        return Err("impedance matrix is zero".to_string());
    }

    let mut a_mat = Coo::with_size(2 * n, 2 * n);
    for i in 0..n {
        for j in 0..n {
            let z_ij = z.get(i, j);
            a_mat.push(i, j, z_ij.re);
            a_mat.push(i, n + j, -z_ij.im);
            a_mat.push(n + i, j, z_ij.im);
            a_mat.push(n + i, n + j, z_ij.re);
        }
    }

    let mut y = Mat::zeros(n, n);
    for k in 0..n {
        let mut b = Arr::zeros(2 * n);
        b[k] = 1.0;
        let x = lin_solver.solve(a_mat.to_csc(), &b)?;
        for i in 0..n {
            y.set(i, k, Complex64::new(x[i], x[n + i]));
        }
    }

    let scale = z.values().iter().fold(0.0, |m: f64, z_ij| m.max(z_ij.norm()))
        * y.values().iter().fold(0.0, |m: f64, y_ij| m.max(y_ij.norm()));
    for i in 0..n {
        for j in 0..n {
            let s: Complex64 = (0..n).map(|k| z.get(i, k) * y.get(k, j)).sum();
            let e = if i == j { 1.0 } else { 0.0 };
            let r = (s - Complex64::new(e, 0.0)).norm();
            if !r.is_finite() || r > RESIDUAL_TOL * scale.max(1.0) {
                return Err("impedance matrix is singular".to_string());
            }
        }
    }
    Ok(y)
}

/// Builds the node admittance matrix of an unbalanced network.
///
/// Each branch contributes its series admittance matrix `Y = Z^-1`:
///
/// ```text
/// | If |   |  Y  -Y |   | Vf |
/// |    | = |        | * |    |
/// | It |   | -Y   Y |   | Vt |
/// ```
///
/// where rows and columns are mapped to nodes through the branch's
/// from/to connections.
pub fn make_ybus(
    math: &MathModel,
    index: &NodeIndex,
    lin_solver: &dyn LinearSolver,
) -> Result<CSR<usize, Complex64>, String> {
    let n = index.len();
    let mut stamps: BTreeMap<(usize, usize), Complex64> = BTreeMap::new();

    for br in &math.branch {
        let y = branch_admittance(&br.z, lin_solver)
            .map_err(|err| format!("branch '{}' impedance: {}", br.name, err))?;

        let node = |bus: usize, t: usize| {
            index
                .get(bus, t)
                .ok_or_else(|| format!("branch '{}': no node for bus {} terminal {}", br.name, bus, t))
        };
        let f = br
            .f_connections
            .iter()
            .map(|&t| node(br.f_bus, t))
            .collect::<Result<Vec<usize>, String>>()?;
        let t = br
            .t_connections
            .iter()
            .map(|&t| node(br.t_bus, t))
            .collect::<Result<Vec<usize>, String>>()?;

        for i in 0..f.len() {
            for j in 0..f.len() {
                let y_ij = y.get(i, j);
                *stamps.entry((f[i], f[j])).or_default() += y_ij;
                *stamps.entry((t[i], t[j])).or_default() += y_ij;
                *stamps.entry((f[i], t[j])).or_default() -= y_ij;
                *stamps.entry((t[i], f[j])).or_default() -= y_ij;
            }
        }
    }

    let mut y_bus = Coo::with_size(n, n);
    for ((i, j), y_ij) in stamps {
        y_bus.push(i, j, y_ij);
    }
    Ok(y_bus.to_csr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{MathBranch, MathBus};
    use spsolve::rlu::RLU;

    fn two_bus(z: Complex64) -> MathModel {
        let bus = |index: usize, name: &str| MathBus {
            index,
            name: name.to_string(),
            terminals: vec![2],
            vbase: 230.0,
        };
        let mut zm = Mat::zeros(1, 1);
        zm.set(0, 0, z);
        MathModel {
            name: "two".to_string(),
            sbase: 1000.0,
            power_scale_factor: 1000.0,
            bus: vec![bus(0, "a"), bus(1, "b")],
            branch: vec![MathBranch {
                name: "l".to_string(),
                f_bus: 0,
                t_bus: 1,
                f_connections: vec![2],
                t_connections: vec![2],
                z: zm,
            }],
            load: vec![],
            gen: BTreeMap::new(),
            ref_bus: 0,
        }
    }

    // Column k of a sparse matrix.
    fn column(y_bus: &CSR<usize, Complex64>, k: usize) -> Vec<Complex64> {
        let mut e = vec![Complex64::default(); y_bus.cols()];
        e[k] = Complex64::new(1.0, 0.0);
        y_bus * e.as_slice()
    }

    #[test]
    fn test_node_index() {
        let math = two_bus(Complex64::new(1.0, 1.0));
        let index = NodeIndex::new(&math);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1, 2), Some(1));
        assert_eq!(index.get(1, 1), None);
    }

    #[test]
    fn test_branch_admittance() {
        let mut z = Mat::zeros(2, 2);
        z.set(0, 0, Complex64::new(2.0, 1.0));
        z.set(0, 1, Complex64::new(0.5, 0.0));
        z.set(1, 0, Complex64::new(0.5, 0.0));
        z.set(1, 1, Complex64::new(1.0, 3.0));

        let y = branch_admittance(&z, &RLU::default()).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let s: Complex64 = (0..2).map(|k| z.get(i, k) * y.get(k, j)).sum();
                let e = if i == j { 1.0 } else { 0.0 };
                assert!((s - Complex64::new(e, 0.0)).norm() < 1e-12);
            }
        }

        let mut singular = Mat::zeros(2, 2);
        for i in 0..2 {
            for j in 0..2 {
                singular.set(i, j, Complex64::new(0.1, 0.2));
            }
        }
        assert!(branch_admittance(&singular, &RLU::default()).is_err());
    }

    #[test]
    fn test_make_ybus() {
        let z = Complex64::new(0.1, 0.2);
        let math = two_bus(z);
        let index = NodeIndex::new(&math);
        let y_bus = make_ybus(&math, &index, &RLU::default()).unwrap();
        let y = Complex64::new(1.0, 0.0) / z;

        let c0 = column(&y_bus, 0);
        let c1 = column(&y_bus, 1);
        assert!((c0[0] - y).norm() < 1e-12);
        assert!((c1[1] - y).norm() < 1e-12);
        assert!((c1[0] + y).norm() < 1e-12);
        assert!((c0[1] + y).norm() < 1e-12);
    }

    #[test]
    fn test_make_ybus_zero_impedance() {
        let math = two_bus(Complex64::new(0.0, 0.0));
        let index = NodeIndex::new(&math);
        let err = make_ybus(&math, &index, &RLU::default()).err().unwrap();
        assert!(err.contains("branch 'l'"));
    }
}
