use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::f64::consts::PI;

use num_complex::Complex64;

use crate::dense::Mat;
use crate::eng::*;
use crate::error::{OpfError, Result};
use crate::math::*;

/// Converts an engineering model into a per-unit math model.
///
/// Base values come from `eng.settings` and the circuit's `basekv`. Buses are
/// numbered in ascending name order. Fails with [`OpfError::ModelBuild`] if
/// the network cannot be represented, or if any phase of any bus is not
/// energized from the source.
pub fn transform(eng: &EngineeringModel) -> Result<MathModel> {
    let build_err = |msg: String| OpfError::ModelBuild(msg);

    let source = eng
        .source
        .as_ref()
        .ok_or_else(|| build_err("network has no voltage source (missing 'new circuit')".into()))?;

    let sbase = eng.settings.sbase_watts();
    if !(sbase > 0.0) {
        return Err(build_err(format!("base power must be positive, got {} W", sbase)));
    }
    let vbase = source.basekv * eng.settings.voltage_scale_factor / 3f64.sqrt();
    if !(vbase > 0.0) {
        return Err(build_err(format!("source basekv must be positive, got {}", source.basekv)));
    }
    if !eng.voltage_bases.is_empty()
        && !eng
            .voltage_bases
            .iter()
            .any(|&kv| (kv - source.basekv).abs() < 1e-6)
    {
        log::warn!(
            "source basekv {} is not among the voltage bases {:?}",
            source.basekv,
            eng.voltage_bases
        );
    }
    let zbase = vbase * vbase / sbase;
    log::debug!("bases: sbase={} VA vbase={} V zbase={} ohm", sbase, vbase, zbase);

    // collect bus terminals
    let mut terminals: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    let mut connect = |name: &str, what: &str, conns: &[usize]| -> Result<()> {
        if let Some(&t) = conns.iter().find(|&&t| !(1..=3).contains(&t)) {
            return Err(build_err(format!(
                "{}: terminal {} of bus '{}' is not a phase conductor",
                what, t, name
            )));
        }
        terminals
            .entry(name.to_string())
            .or_default()
            .extend(conns.iter().copied());
        Ok(())
    };

    let source_conns = source.bus.conductors(source.phases);
    connect(&source.bus.name, "source", &source_conns)?;

    let mut line_conns = Vec::with_capacity(eng.lines.len());
    for line in &eng.lines {
        let what = format!("line '{}'", line.name);
        let f = line.bus1.conductors(line.phases);
        let t = line.bus2.conductors(line.phases);
        if f.len() != line.phases || t.len() != line.phases {
            return Err(build_err(format!(
                "{}: {} phases but terminals {:?} -> {:?}",
                what, line.phases, f, t
            )));
        }
        connect(&line.bus1.name, &what, &f)?;
        connect(&line.bus2.name, &what, &t)?;
        line_conns.push((f, t));
    }

    let mut load_conns = Vec::with_capacity(eng.loads.len());
    for load in &eng.loads {
        let what = format!("load '{}'", load.name);
        if load.conn == Connection::Delta {
            return Err(build_err(format!("{}: delta connection is not supported", what)));
        }
        let c = load.bus1.conductors(load.phases);
        if c.len() != load.phases {
            return Err(build_err(format!(
                "{}: {} phases but terminals {:?}",
                what, load.phases, c
            )));
        }
        connect(&load.bus1.name, &what, &c)?;
        load_conns.push(c);
    }

    let bus: Vec<MathBus> = terminals
        .into_iter()
        .enumerate()
        .map(|(index, (name, terms))| MathBus {
            index,
            name,
            terminals: terms.into_iter().collect(),
            vbase,
        })
        .collect();
    let lookup: HashMap<&str, usize> = bus.iter().map(|b| (b.name.as_str(), b.index)).collect();
    let ref_bus = lookup[source.bus.name.as_str()];

    // branches
    let mut branch = Vec::with_capacity(eng.lines.len());
    for (line, (f, t)) in eng.lines.iter().zip(line_conns) {
        let (z_data, code_units) = match &line.linecode {
            Some(code) => {
                let lc = eng.linecodes.get(code).ok_or_else(|| {
                    build_err(format!("line '{}': unknown linecode '{}'", line.name, code))
                })?;
                (lc.z.merged(&line.z), lc.units)
            }
            None => (line.z.clone(), LengthUnit::None),
        };
        let scale = match line.units {
            Some(units) if units != LengthUnit::None && code_units != LengthUnit::None => {
                units.metres() / code_units.metres()
            }
            _ => 1.0,
        };
        let z_pul = impedance_matrix(&z_data, line.phases)
            .map_err(|msg| build_err(format!("line '{}': {}", line.name, msg)))?;
        let z = z_pul.map(|z| z * line.length * scale / zbase);

        branch.push(MathBranch {
            name: line.name.clone(),
            f_bus: lookup[line.bus1.name.as_str()],
            t_bus: lookup[line.bus2.name.as_str()],
            f_connections: f,
            t_connections: t,
            z,
        });
    }

    // loads
    let load = eng
        .loads
        .iter()
        .zip(load_conns)
        .map(|(ld, connections)| {
            let n = connections.len() as f64;
            let s = Complex64::new(ld.kw, ld.kvar) * eng.settings.power_scale_factor / n / sbase;
            let kv_ln = if ld.phases == 1 {
                ld.kv
            } else {
                ld.kv / 3f64.sqrt()
            };
            MathLoad {
                name: ld.name.clone(),
                bus: lookup[ld.bus1.name.as_str()],
                sd: vec![s; connections.len()],
                connections,
                vnom: kv_ln * eng.settings.voltage_scale_factor / vbase,
                model: ld.model,
            }
        })
        .collect::<Vec<MathLoad>>();

    // the voltage source becomes generator "1"
    let angle = source.angle.to_radians();
    let source_gen = MathGen {
        id: "1".to_string(),
        name: "source".to_string(),
        bus: ref_bus,
        vg: vec![source.pu; source_conns.len()],
        va: source_conns
            .iter()
            .map(|&t| angle - 2.0 * PI / 3.0 * (t - 1) as f64)
            .collect(),
        connections: source_conns,
        cost: Vec::new(),
    };
    let mut gen = BTreeMap::new();
    gen.insert(source_gen.id.clone(), source_gen);

    let math = MathModel {
        name: eng.name.clone(),
        sbase,
        power_scale_factor: eng.settings.power_scale_factor,
        bus,
        branch,
        load,
        gen,
        ref_bus,
    };
    check_energized(&math)?;

    log::debug!(
        "math model '{}': {} buses, {} branches, {} loads",
        math.name,
        math.bus.len(),
        math.branch.len(),
        math.load.len()
    );
    Ok(math)
}

/// Builds the n x n series impedance matrix (per unit length) from matrix or
/// sequence data.
fn impedance_matrix(z: &Impedance, n: usize) -> std::result::Result<Mat<Complex64>, String> {
    let mut mat = Mat::zeros(n, n);

    if z.rmatrix.is_some() || z.xmatrix.is_some() {
        let r = expand_matrix(z.rmatrix.as_deref(), n)?;
        let x = expand_matrix(z.xmatrix.as_deref(), n)?;
        for i in 0..n {
            for j in 0..n {
                mat.set(i, j, Complex64::new(r.get(i, j), x.get(i, j)));
            }
        }
        return Ok(mat);
    }

    let (r1, x1) = match (z.r1, z.x1) {
        (Some(r1), Some(x1)) => (r1, x1),
        _ => return Err("no impedance data (r1/x1 or rmatrix/xmatrix)".to_string()),
    };
    let z1 = Complex64::new(r1, x1);
    let z0 = Complex64::new(z.r0.unwrap_or(r1), z.x0.unwrap_or(x1));
    let zs = (2.0 * z1 + z0) / 3.0;
    let zm = (z0 - z1) / 3.0;
    for i in 0..n {
        for j in 0..n {
            mat.set(i, j, if i == j { zs } else { zm });
        }
    }
    Ok(mat)
}

/// Expands lower-triangular (or full) rows into a symmetric n x n matrix.
fn expand_matrix(rows: Option<&[Vec<f64>]>, n: usize) -> std::result::Result<Mat<f64>, String> {
    let mut mat = Mat::zeros(n, n);
    let Some(rows) = rows else {
        return Ok(mat);
    };
    if rows.len() < n {
        return Err(format!("impedance matrix has {} rows, need {}", rows.len(), n));
    }
    for i in 0..n {
        for j in 0..=i {
            let v = *rows[i]
                .get(j)
                .ok_or_else(|| format!("impedance matrix row {} is too short", i + 1))?;
            mat.set(i, j, v);
            mat.set(j, i, v);
        }
    }
    Ok(mat)
}

/// Checks that every (bus, terminal) node is reachable from the source
/// terminals through branch conductors.
fn check_energized(math: &MathModel) -> Result<()> {
    let mut adj: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();
    for br in &math.branch {
        for (&f, &t) in br.f_connections.iter().zip(&br.t_connections) {
            adj.entry((br.f_bus, f)).or_default().push((br.t_bus, t));
            adj.entry((br.t_bus, t)).or_default().push((br.f_bus, f));
        }
    }

    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut queue: VecDeque<(usize, usize)> = math
        .gen
        .values()
        .filter(|g| g.bus == math.ref_bus)
        .flat_map(|g| g.connections.iter().map(|&t| (g.bus, t)))
        .collect();
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = adj.get(&node) {
            queue.extend(next.iter().filter(|n| !seen.contains(*n)));
        }
    }

    for (b, t) in math.nodes() {
        if !seen.contains(&(b, t)) {
            return Err(OpfError::ModelBuild(format!(
                "phase {} of bus '{}' is not connected to the source",
                t, math.bus[b].name
            )));
        }
    }
    Ok(())
}
