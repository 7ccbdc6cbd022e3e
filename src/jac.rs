use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::{CCSR, CSR};

use crate::debug::format_polar_vec;
use crate::math::J;

/// Computes partial derivatives of the complex node power injections
/// w.r.t. voltage.
///
/// Returns `(dS_dVa, dS_dVm)` where:
///
/// ```text
/// dS_dVa = j diag(V) conj(diag(I) - Y diag(V))
/// dS_dVm = diag(V) conj(Y diag(Vn)) + conj(diag(I)) diag(Vn)
/// ```
///
/// with `I = Y V` and `Vn = V / |V|`. All quantities are per unit with
/// radians for voltage angles.
pub fn d_sbus_d_v(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> (CSR<usize, Complex64>, CSR<usize, Complex64>) {
    let i_bus = y_bus * v;

    let v_norm = v
        .iter()
        .map(|&vi| {
            if vi.norm() == 0.0 {
                Complex64::new(1.0, 0.0)
            } else {
                vi / vi.norm()
            }
        })
        .collect();

    let diag_v = CSR::<usize, Complex64>::with_diagonal(v.to_vec());
    let diag_i_bus = CSR::<usize, Complex64>::with_diagonal(i_bus);
    let diag_v_norm = CSR::<usize, Complex64>::with_diagonal(v_norm);

    let mut d_sbus_d_va = &diag_v * (&diag_i_bus - y_bus * &diag_v).conj() * J;
    let d_sbus_d_vm = &diag_v * (y_bus * &diag_v_norm).conj() + diag_i_bus.conj() * &diag_v_norm;

    d_sbus_d_va.sort_indexes();

    (d_sbus_d_va, d_sbus_d_vm)
}

/// Forms the reduced Newton power flow Jacobian over the free nodes `pq`.
///
/// ```text
/// | J11 J12 |   | Re dS_dVa   Re dS_dVm |
/// |         | = |                       |
/// | J21 J22 |   | Im dS_dVa   Im dS_dVm |
/// ```
///
/// `d_sbus_d_vm` holds the voltage sensitivity of the specified injection at
/// each node and is subtracted from the diagonal of the magnitude blocks.
pub fn make_jac(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    d_sbus_d_vm: &[Complex64],
    pq: &[usize],
) -> Result<CSC<usize, f64>, String> {
    log::trace!("V: {}", format_polar_vec(v));

    let (ds_dva, ds_dvm) = d_sbus_d_v(y_bus, v);
    let ds_dvm = ds_dvm - CSR::<usize, Complex64>::with_diagonal(d_sbus_d_vm.to_vec());

    let j11 = ds_dva.select(Some(pq), Some(pq)).map_err(|e| e.to_string())?.real();
    let j12 = ds_dvm.select(Some(pq), Some(pq)).map_err(|e| e.to_string())?.real();
    let j21 = ds_dva.select(Some(pq), Some(pq)).map_err(|e| e.to_string())?.imag();
    let j22 = ds_dvm.select(Some(pq), Some(pq)).map_err(|e| e.to_string())?.imag();

    let jac = Coo::compose([
        [&j11.to_coo(), &j12.to_coo()],
        [&j21.to_coo(), &j22.to_coo()],
    ])
    .map_err(|e| e.to_string())?
    .to_csc();
    log::trace!("J:\n{}", jac.to_csr().to_table());

    Ok(jac)
}
