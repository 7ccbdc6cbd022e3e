use std::fs;
use std::path::{Path, PathBuf};

use crate::eng::*;
use crate::error::{OpfError, Result};

const MAX_REDIRECT_DEPTH: usize = 16;

/// Reads a circuit file into an engineering model.
///
/// Supports the subset of the OpenDSS command language needed to describe
/// radial LV feeders: `clear`, `new` (circuit, linecode, line, load), `set
/// voltagebases`, `redirect`/`compile`, with `~`/`more` continuation lines.
/// Other element classes are skipped with a warning.
pub fn parse_file(path: &Path) -> Result<EngineeringModel> {
    let mut parser = Parser::default();
    parser.parse_path(path, 0)?;
    Ok(parser.eng)
}

/// Parses circuit text. `path` is used for error messages and to resolve
/// `redirect` commands.
pub fn parse_str(text: &str, path: &Path) -> Result<EngineeringModel> {
    let mut parser = Parser::default();
    parser.parse_text(text, path, 0)?;
    Ok(parser.eng)
}

#[derive(Default)]
struct Parser {
    eng: EngineeringModel,
}

/// A command with continuation lines folded in.
struct Statement {
    line: usize,
    text: String,
}

/// `key=value` properties of a `new` command.
struct Props {
    pairs: Vec<(String, String)>,
}

impl Parser {
    fn parse_path(&mut self, path: &Path, depth: usize) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|source| OpfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_text(&text, path, depth)
    }

    fn parse_text(&mut self, text: &str, path: &Path, depth: usize) -> Result<()> {
        for stmt in statements(text) {
            let err = |msg: String| OpfError::Parse {
                path: path.to_path_buf(),
                line: stmt.line,
                msg,
            };
            let tokens = tokenize(&stmt.text).map_err(err)?;
            let Some((command, args)) = tokens.split_first() else {
                continue;
            };
            match command.to_lowercase().as_str() {
                "clear" => self.eng = EngineeringModel::default(),
                "new" => self.new_element(args).map_err(err)?,
                "set" => self.set_option(args).map_err(err)?,
                "redirect" | "compile" => {
                    if depth >= MAX_REDIRECT_DEPTH {
                        return Err(err("redirect nesting too deep".to_string()));
                    }
                    let file = args
                        .first()
                        .ok_or_else(|| err(format!("{} requires a file name", command)))?;
                    let target = resolve(path, file);
                    log::debug!("redirect to {}", target.display());
                    self.parse_path(&target, depth + 1)?;
                }
                "calcvoltagebases" | "solve" | "buscoords" | "show" | "export" | "plot"
                | "closedi" => {
                    log::debug!("ignoring command '{}'", command);
                }
                other => return Err(err(format!("unknown command '{}'", other))),
            }
        }
        Ok(())
    }

    fn new_element(&mut self, args: &[String]) -> std::result::Result<(), String> {
        let (object, rest) = match args {
            [key, eq, value, rest @ ..] if eq == "=" && key.eq_ignore_ascii_case("object") => {
                (value.as_str(), rest)
            }
            [object, rest @ ..] => (object.as_str(), rest),
            [] => return Err("new requires an element name".to_string()),
        };
        let (class, name) = object
            .split_once('.')
            .ok_or_else(|| format!("element '{}' must be written as class.name", object))?;
        let (class, name) = (class.to_lowercase(), name.to_lowercase());
        let props = Props::parse(rest)?;

        match class.as_str() {
            "circuit" => {
                self.eng.name = name;
                self.eng.source = Some(VoltageSource {
                    bus: props
                        .get("bus1")
                        .map(parse_bus_ref)
                        .transpose()?
                        .unwrap_or_else(|| BusRef {
                            name: "sourcebus".to_string(),
                            terminals: vec![],
                        }),
                    basekv: props.f64_or("basekv", 115.0)?,
                    pu: props.f64_or("pu", 1.0)?,
                    angle: props.f64_or("angle", 0.0)?,
                    phases: props.usize_or("phases", 3)?,
                });
            }
            "linecode" => {
                let linecode = LineCode {
                    name: name.clone(),
                    nphases: props.usize_or("nphases", 3)?,
                    z: props.impedance()?,
                    units: props.units()?.unwrap_or(LengthUnit::None),
                };
                self.eng.linecodes.insert(name, linecode);
            }
            "line" => {
                let line = Line {
                    name: name.clone(),
                    bus1: parse_bus_ref(props.require("bus1", &name)?)?,
                    bus2: parse_bus_ref(props.require("bus2", &name)?)?,
                    phases: props.usize_or("phases", 3)?,
                    linecode: props.get("linecode").map(|s| s.to_lowercase()),
                    length: props.f64_or("length", 1.0)?,
                    units: props.units()?,
                    z: props.impedance()?,
                };
                self.eng.lines.push(line);
            }
            "load" => {
                let kw = props.f64_or("kw", 10.0)?;
                let kvar = match props.f64("kvar")? {
                    Some(kvar) => kvar,
                    None => {
                        let pf = props.f64_or("pf", 0.88)?;
                        if pf == 0.0 || pf.abs() > 1.0 {
                            return Err(format!("load '{}': power factor {} out of range", name, pf));
                        }
                        kw * pf.signum() * (1.0 / (pf * pf) - 1.0).sqrt()
                    }
                };
                let code = props.usize_or("model", 1)?;
                let model = LoadModel::from_code(code)
                    .ok_or_else(|| format!("load '{}': unsupported load model {}", name, code))?;
                let conn = match props.get("conn").map(|s| s.to_lowercase()).as_deref() {
                    None | Some("wye") | Some("y") | Some("ln") => Connection::Wye,
                    Some("delta") | Some("d") | Some("ll") => Connection::Delta,
                    Some(other) => {
                        return Err(format!("load '{}': unknown connection '{}'", name, other))
                    }
                };
                let load = Load {
                    name: name.clone(),
                    bus1: parse_bus_ref(props.require("bus1", &name)?)?,
                    phases: props.usize_or("phases", 3)?,
                    kv: props.f64_or("kv", 12.47)?,
                    kw,
                    kvar,
                    model,
                    conn,
                };
                self.eng.loads.push(load);
            }
            other => {
                log::warn!("skipping unsupported element {}.{}", other, name);
            }
        }
        Ok(())
    }

    fn set_option(&mut self, args: &[String]) -> std::result::Result<(), String> {
        let props = Props::parse(args)?;
        for (key, value) in &props.pairs {
            match key.as_str() {
                "voltagebases" => {
                    self.eng.voltage_bases = value
                        .split_whitespace()
                        .map(|v| parse_f64(key, v))
                        .collect::<std::result::Result<_, _>>()?;
                }
                _ => log::debug!("ignoring option '{}'", key),
            }
        }
        Ok(())
    }
}

impl Props {
    fn parse(tokens: &[String]) -> std::result::Result<Self, String> {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            match (tokens.get(i + 1), tokens.get(i + 2)) {
                (Some(eq), Some(value)) if eq == "=" => {
                    pairs.push((tokens[i].to_lowercase(), value.clone()));
                    i += 3;
                }
                _ => {
                    return Err(format!(
                        "expected key=value, found '{}' (positional properties are not supported)",
                        tokens[i]
                    ))
                }
            }
        }
        Ok(Self { pairs })
    }

    /// Last value given for `key`.
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str, element: &str) -> std::result::Result<&str, String> {
        self.get(key)
            .ok_or_else(|| format!("'{}' requires property '{}'", element, key))
    }

    fn f64(&self, key: &str) -> std::result::Result<Option<f64>, String> {
        self.get(key).map(|v| parse_f64(key, v)).transpose()
    }

    fn f64_or(&self, key: &str, default: f64) -> std::result::Result<f64, String> {
        Ok(self.f64(key)?.unwrap_or(default))
    }

    fn usize_or(&self, key: &str, default: usize) -> std::result::Result<usize, String> {
        match self.get(key) {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| format!("invalid integer for '{}': '{}'", key, v)),
            None => Ok(default),
        }
    }

    fn units(&self) -> std::result::Result<Option<LengthUnit>, String> {
        self.get("units")
            .map(|v| LengthUnit::parse(v).ok_or_else(|| format!("unknown length unit '{}'", v)))
            .transpose()
    }

    fn impedance(&self) -> std::result::Result<Impedance, String> {
        Ok(Impedance {
            r1: self.f64("r1")?,
            x1: self.f64("x1")?,
            r0: self.f64("r0")?,
            x0: self.f64("x0")?,
            rmatrix: self.get("rmatrix").map(parse_matrix).transpose()?,
            xmatrix: self.get("xmatrix").map(parse_matrix).transpose()?,
        })
    }
}

fn parse_f64(key: &str, value: &str) -> std::result::Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid number for '{}': '{}'", key, value))
}

/// Parses `name.t1.t2...` into a bus reference.
pub(crate) fn parse_bus_ref(s: &str) -> std::result::Result<BusRef, String> {
    let mut parts = s.split('.');
    let name = parts.next().unwrap_or_default().trim().to_lowercase();
    if name.is_empty() {
        return Err(format!("empty bus name in '{}'", s));
    }
    let terminals = parts
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| format!("invalid terminal '{}' in bus '{}'", t, s))
        })
        .collect::<std::result::Result<Vec<usize>, String>>()?;
    Ok(BusRef { name, terminals })
}

/// Parses a lower-triangular matrix written as `a | b c | d e f`.
fn parse_matrix(s: &str) -> std::result::Result<Vec<Vec<f64>>, String> {
    s.split('|')
        .map(|row| {
            row.split_whitespace()
                .map(|v| parse_f64("matrix", v))
                .collect::<std::result::Result<Vec<f64>, String>>()
        })
        .collect()
}

fn resolve(current: &Path, file: &str) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        return file.to_path_buf();
    }
    match current.parent() {
        Some(dir) => dir.join(file),
        None => file.to_path_buf(),
    }
}

fn strip_comment(line: &str) -> &str {
    let end = [line.find('!'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..end]
}

/// Splits text into statements, folding `~` and `more` continuation lines
/// into the preceding command.
fn statements(text: &str) -> Vec<Statement> {
    let mut out: Vec<Statement> = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let continuation = if let Some(rest) = line.strip_prefix('~') {
            Some(rest)
        } else {
            let head = line.split_whitespace().next().unwrap_or_default();
            if head.eq_ignore_ascii_case("more") {
                Some(&line[head.len()..])
            } else {
                None
            }
        };
        match (continuation, out.last_mut()) {
            (Some(rest), Some(prev)) => {
                prev.text.push(' ');
                prev.text.push_str(rest);
            }
            _ => out.push(Statement {
                line: i + 1,
                text: line.to_string(),
            }),
        }
    }
    out
}

/// Splits a statement into words, `=` separators and bracketed/quoted
/// groups (returned without their delimiters).
fn tokenize(s: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut chars = s.chars();

    fn flush(cur: &mut String, tokens: &mut Vec<String>) {
        if !cur.is_empty() {
            tokens.push(std::mem::take(cur));
        }
    }

    while let Some(c) = chars.next() {
        let close = match c {
            '[' => Some(']'),
            '(' => Some(')'),
            '{' => Some('}'),
            '"' => Some('"'),
            '\'' => Some('\''),
            _ => None,
        };
        if let Some(close) = close {
            flush(&mut cur, &mut tokens);
            let mut group = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == close => break,
                    Some(c) => group.push(c),
                    None => return Err(format!("unterminated '{}'", c)),
                }
            }
            tokens.push(group.replace(',', " ").trim().to_string());
        } else if c == '=' {
            flush(&mut cur, &mut tokens);
            tokens.push("=".to_string());
        } else if c.is_whitespace() || c == ',' {
            flush(&mut cur, &mut tokens);
        } else {
            cur.push(c);
        }
    }
    flush(&mut cur, &mut tokens);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<EngineeringModel> {
        parse_str(text, Path::new("test.dss"))
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("new line.l1 bus1 = a.1.2.3 rmatrix=[1 | 2, 3]").unwrap();
        assert_eq!(
            tokens,
            vec!["new", "line.l1", "bus1", "=", "a.1.2.3", "rmatrix", "=", "1 | 2  3"]
        );
        assert!(tokenize("rmatrix=[1 2").is_err());
    }

    #[test]
    fn test_bus_ref() {
        let b = parse_bus_ref("B1.1.2.3").unwrap();
        assert_eq!(b.name, "b1");
        assert_eq!(b.terminals, vec![1, 2, 3]);
        assert_eq!(b.conductors(3), vec![1, 2, 3]);

        let b = parse_bus_ref("b2.2.0").unwrap();
        assert_eq!(b.conductors(1), vec![2]);

        let b = parse_bus_ref("b3").unwrap();
        assert_eq!(b.conductors(3), vec![1, 2, 3]);

        assert!(parse_bus_ref("b4.x").is_err());
    }

    #[test]
    fn test_parse_elements() -> Result<()> {
        let eng = parse(
            "Clear ! start over\n\
             New Circuit.test basekv=0.4 pu=1.02 phases=3 bus1=src\n\
             new linecode.lc nphases=3 r1=0.2 x1=0.07 r0=0.3 x0=0.1 units=km\n\
             new line.l1 bus1=src.1.2.3 bus2=b1.1.2.3\n\
             ~ linecode=lc length=50 units=m\n\
             new load.ld1 bus1=b1.2 phases=1 kv=0.23 kw=3 pf=0.95 // comment\n\
             new pvsystem.pv1 bus1=b1\n\
             set voltagebases=[0.4]\n\
             calcvoltagebases\n\
             solve\n",
        )?;

        assert_eq!(eng.name, "test");
        let source = eng.source.as_ref().unwrap();
        assert_eq!(source.bus.name, "src");
        assert_eq!(source.basekv, 0.4);
        assert_eq!(source.pu, 1.02);

        let lc = &eng.linecodes["lc"];
        assert_eq!(lc.units, LengthUnit::Km);
        assert_eq!(lc.z.r1, Some(0.2));

        assert_eq!(eng.lines.len(), 1);
        let line = &eng.lines[0];
        assert_eq!(line.linecode.as_deref(), Some("lc"));
        assert_eq!(line.length, 50.0);
        assert_eq!(line.units, Some(LengthUnit::M));

        assert_eq!(eng.loads.len(), 1);
        let load = &eng.loads[0];
        assert_eq!(load.bus1.conductors(load.phases), vec![2]);
        assert_eq!(load.model, LoadModel::ConstantPower);
        assert!((load.kvar - 3.0 * (1.0 / (0.95 * 0.95) - 1.0f64).sqrt()).abs() < 1e-12);

        assert_eq!(eng.voltage_bases, vec![0.4]);
        Ok(())
    }

    #[test]
    fn test_parse_matrix_linecode() -> Result<()> {
        let eng = parse(
            "new linecode.m nphases=2 rmatrix=(0.1 | 0.02 0.1) xmatrix=(0.3 | 0.05 0.3) units=kft",
        )?;
        let lc = &eng.linecodes["m"];
        assert_eq!(lc.nphases, 2);
        assert_eq!(lc.z.rmatrix, Some(vec![vec![0.1], vec![0.02, 0.1]]));
        assert_eq!(lc.units, LengthUnit::Kft);
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        match parse("new circuit.c\nnew line.l1 bus1=a length=x") {
            Err(OpfError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(matches!(parse("frobnicate"), Err(OpfError::Parse { .. })));
        assert!(matches!(
            parse("new line.l1 bus2=b"),
            Err(OpfError::Parse { .. })
        ));
        assert!(matches!(
            parse("new load.x bus1=b model=7"),
            Err(OpfError::Parse { .. })
        ));
        assert!(matches!(parse("new line.l1 a b"), Err(OpfError::Parse { .. })));
    }

    #[test]
    fn test_redirect() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("lines.dss"),
            "new line.l1 bus1=a bus2=b r1=0.1 x1=0.1 r0=0.1 x0=0.1\n",
        )?;
        let master = dir.path().join("master.dss");
        fs::write(&master, "new circuit.c basekv=0.4 bus1=a\nredirect lines.dss\n")?;

        let eng = parse_file(&master)?;
        assert_eq!(eng.lines.len(), 1);
        assert_eq!(eng.lines[0].bus2.name, "b");

        let missing = dir.path().join("missing.dss");
        assert!(matches!(parse_file(&missing), Err(OpfError::Io { .. })));
        Ok(())
    }
}
