use densetools::Arr;
use sparsetools::csc::CSC;
use spsolve::rlu::RLU;
use spsolve::Solver;

use crate::error::OpfError;
use crate::model::ModelInstance;
use crate::opt::SolverOptions;
use crate::solution::RawSolution;

pub trait LinearSolver {
    fn solve(&self, a_mat: CSC<usize, f64>, b: &Arr<f64>) -> Result<Arr<f64>, String>;
}

impl LinearSolver for RLU {
    fn solve(&self, a_mat: CSC<usize, f64>, b: &Arr<f64>) -> Result<Arr<f64>, String> {
        let n = a_mat.cols();
        if a_mat.rows() != n {
            return Err(format!("matrix is not square ({} x {})", a_mat.rows(), n));
        }
        let mut x: Vec<f64> = (0..n).map(|i| b[i]).collect();
        Solver::solve(
            self,
            n,
            a_mat.rowidx(),
            a_mat.colptr(),
            a_mat.values(),
            &mut x,
            false,
        )
        .map_err(|e| e.to_string())?;
        if x.iter().any(|x_i| !x_i.is_finite()) {
            return Err("matrix is singular".to_string());
        }

        let mut dx = Arr::zeros(n);
        for (i, x_i) in x.into_iter().enumerate() {
            dx[i] = x_i;
        }
        Ok(dx)
    }
}

/// A nonlinear solver for instantiated OPF models.
///
/// Failing to converge is not an error: it is reported through the
/// termination status of the returned solution. An `Err` means the model
/// could not be turned into solver data.
pub trait NlpSolver {
    fn name(&self) -> &str;

    fn solve(
        &self,
        model: &ModelInstance,
        options: &SolverOptions,
    ) -> Result<RawSolution, OpfError>;
}

pub trait ProgressMonitor {
    fn update(&self, i: usize, norm_f: f64);
}
