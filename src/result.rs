use std::fmt;

use crate::debug::{format_f64, format_f64_vec, format_polar_parts};
use crate::solution::{RawSolution, TerminationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub fn from_terminal(t: usize) -> Option<Phase> {
        match t {
            1 => Some(Phase::A),
            2 => Some(Phase::B),
            3 => Some(Phase::C),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub bus_id: String,
    pub phase: Phase,

    /// Voltage magnitude rounded to 3 decimal places.
    pub vm_pu: f64,

    /// Voltage angle in degrees rounded to 1 decimal place.
    pub va_deg: f64,
}

/// Per bus, per phase voltages ordered by bus id then phase.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter()
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{:<16} {:<5} {:>8} {:>9}",
            "bus", "phase", "vm (pu)", "va (deg)"
        )];
        lines.extend(self.rows.iter().map(|r| {
            format!(
                "{:<16} {:<5} {:>8.3} {:>9.1}",
                r.bus_id, r.phase, r.vm_pu, r.va_deg
            )
        }));
        lines
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Rounds half away from zero to `decimals` places. NaN is returned as is.
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (x * p).round() / p
}

/// Tabulates the phase voltages of every bus. Terminals other than 1, 2
/// and 3 are left out.
pub fn format(raw: &RawSolution) -> ResultTable {
    let mut rows: Vec<ResultRow> = raw
        .per_bus
        .iter()
        .flat_map(|(bus_id, bus)| {
            bus.terminals
                .iter()
                .zip(bus.vm.iter().zip(&bus.va))
                .filter_map(move |(&t, (&vm, &va))| {
                    Phase::from_terminal(t).map(|phase| ResultRow {
                        bus_id: bus_id.clone(),
                        phase,
                        vm_pu: round_to(vm, 3),
                        va_deg: round_to(va.to_degrees(), 1),
                    })
                })
        })
        .collect();
    rows.sort_by(|a, b| (&a.bus_id, a.phase).cmp(&(&b.bus_id, b.phase)));
    ResultTable { rows }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Unchecked,
    Converged,
    NotConverged,
}

impl Convergence {
    /// Moves out of `Unchecked` given a termination status. Checked states
    /// are final.
    pub fn check(self, status: TerminationStatus) -> Self {
        match self {
            Convergence::Unchecked if status.is_solved() => Convergence::Converged,
            Convergence::Unchecked => Convergence::NotConverged,
            checked => checked,
        }
    }
}

/// Human readable summary of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub convergence: Convergence,
    pub lines: Vec<String>,

    /// Number of table rows included.
    pub rows: usize,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Reports a solve. Results are only included when the solver reached a
/// locally optimal solution; otherwise the report is a single warning.
/// Every line is also logged.
pub fn report(raw: &RawSolution, table: &ResultTable) -> Report {
    let convergence = Convergence::Unchecked.check(raw.termination_status);

    if convergence != Convergence::Converged {
        let warning = format!(
            "OPF did not converge (termination status {}), no results reported",
            raw.termination_status
        );
        log::warn!("{}", warning);
        return Report {
            convergence,
            lines: vec![warning],
            rows: 0,
        };
    }

    let mut lines = vec![
        format!("Termination status: {}", raw.termination_status),
        format!("Objective: {:.3}", round_to(raw.objective, 3)),
        format!("Solve time: {:.6} s", round_to(raw.solve_time_seconds, 6)),
    ];
    lines.extend(table.lines());
    for line in &lines {
        log::info!("{}", line);
    }
    Report {
        convergence,
        lines,
        rows: table.len(),
    }
}

/// Lists the raw per-bus, per-generator and per-load quantities.
pub fn dump(raw: &RawSolution) -> String {
    Dump(raw).to_string()
}

struct Dump<'a>(&'a RawSolution);

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.0;
        let units = if raw.per_unit { "pu" } else { "SI" };
        writeln!(
            f,
            "status: {}  objective: {}  iterations: {}  units: {}",
            raw.termination_status,
            format_f64(raw.objective),
            raw.iterations,
            units
        )?;

        writeln!(f, "buses:")?;
        for (name, bus) in &raw.per_bus {
            writeln!(
                f,
                "  {} {:?}: {}",
                name,
                bus.terminals,
                format_polar_parts(&bus.vm, &bus.va)
            )?;
        }
        writeln!(f, "generators:")?;
        for (id, gen) in &raw.per_gen {
            writeln!(
                f,
                "  {} {:?}: pg={} qg={}",
                id,
                gen.connections,
                format_f64_vec(&gen.pg),
                format_f64_vec(&gen.qg)
            )?;
        }
        writeln!(f, "loads:")?;
        for (name, load) in &raw.per_load {
            writeln!(
                f,
                "  {} {:?}: pd={} qd={}",
                name,
                load.connections,
                format_f64_vec(&load.pd),
                format_f64_vec(&load.qd)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::BusSolution;

    fn raw(status: TerminationStatus) -> RawSolution {
        let mut raw = RawSolution::empty(status);
        raw.objective = 14.23456;
        raw.solve_time_seconds = 0.0123456789;
        raw.per_bus.insert(
            "b2".to_string(),
            BusSolution {
                terminals: vec![3, 1, 2],
                vm: vec![0.98771, 1.0004, 0.99949],
                va: vec![
                    119.96f64.to_radians(),
                    (-0.04f64).to_radians(),
                    (-120.3f64).to_radians(),
                ],
            },
        );
        raw.per_bus.insert(
            "b10".to_string(),
            BusSolution {
                terminals: vec![1, 4],
                vm: vec![f64::NAN, 1.0],
                va: vec![0.0, 0.0],
            },
        );
        raw
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.98771, 3), 0.988);
        assert_eq!(round_to(-120.25, 1), -120.3);
        assert_eq!(round_to(1.0004, 3), 1.0);
        assert!(round_to(f64::NAN, 3).is_nan());
    }

    #[test]
    fn test_format() {
        let table = format(&raw(TerminationStatus::LocallySolved));
        assert_eq!(table.len(), 4);

        let keys: Vec<(String, Phase)> =
            table.iter().map(|r| (r.bus_id.clone(), r.phase)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0], ("b10".to_string(), Phase::A));
        assert_eq!(keys[1], ("b2".to_string(), Phase::A));
        assert_eq!(keys[3], ("b2".to_string(), Phase::C));

        assert!(table.rows()[0].vm_pu.is_nan());
        let c = &table.rows()[3];
        assert_eq!(c.vm_pu, 0.988);
        assert_eq!(c.va_deg, 120.0);
        assert_eq!(c.phase.to_string(), "c");
    }

    #[test]
    fn test_convergence_check() {
        use TerminationStatus::*;
        assert_eq!(Convergence::Unchecked.check(LocallySolved), Convergence::Converged);
        assert_eq!(
            Convergence::Unchecked.check(AlmostLocallySolved),
            Convergence::NotConverged
        );
        assert_eq!(
            Convergence::Converged.check(NumericalError),
            Convergence::Converged
        );
    }

    #[test]
    fn test_report() {
        let solved = raw(TerminationStatus::LocallySolved);
        let table = format(&solved);
        let rep = report(&solved, &table);
        assert_eq!(rep.convergence, Convergence::Converged);
        assert_eq!(rep.rows, 4);
        assert_eq!(rep.lines[1], "Objective: 14.235");
        assert_eq!(rep.lines[2], "Solve time: 0.012346 s");
        assert_eq!(rep.lines.len(), 3 + 1 + 4);

        let failed = raw(TerminationStatus::LocallyInfeasible);
        let rep = report(&failed, &format(&failed));
        assert_eq!(rep.convergence, Convergence::NotConverged);
        assert_eq!(rep.rows, 0);
        assert_eq!(rep.lines.len(), 1);
        assert!(rep.lines[0].contains("LOCALLY_INFEASIBLE"));
    }

    #[test]
    fn test_dump() {
        let s = dump(&raw(TerminationStatus::LocallySolved));
        assert!(s.starts_with("status: LOCALLY_SOLVED"));
        assert!(s.contains("  b2 [3, 1, 2]"));

        let section = |name: &str| s.lines().position(|l| l == name).unwrap();
        assert!(section("buses:") < section("generators:"));
        assert!(section("generators:") < section("loads:"));
        assert!(s.ends_with('\n'));
    }
}
