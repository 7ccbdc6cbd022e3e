use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64(f: f64) -> String {
    dtoa(f, FLOAT_CONFIG)
}

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

/// Formats magnitudes and angles (radians) as `|v|∠deg°` pairs.
pub fn format_polar_parts(vm: &[f64], va: &[f64]) -> String {
    let a: Vec<String> = vm
        .iter()
        .zip(va)
        .map(|(m, a)| {
            format!(
                "{}\u{2220}{}\u{00B0}",
                dtoa(*m, FLOAT_CONFIG),
                dtoa(a.to_degrees(), FLOAT_CONFIG)
            )
        })
        .collect();
    format!("[{}]", a.join(", "))
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let vm: Vec<f64> = v.iter().map(|z| z.norm()).collect();
    let va: Vec<f64> = v.iter().map(|z| z.arg()).collect();
    format_polar_parts(&vm, &va)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(format_f64_vec(&[1.0, 0.25]), "[1, 0.25]");
        assert_eq!(format_f64(2.5), "2.5");
        let v = [Complex64::from_polar(1.0, 90f64.to_radians())];
        assert_eq!(format_polar_vec(&v), "[1\u{2220}90\u{00B0}]");
    }
}
