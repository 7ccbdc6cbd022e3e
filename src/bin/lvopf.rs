use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use lvopf::{dump, initialize, parse_file, report, solve_opf, Configuration};
use std::path::PathBuf;

/// Unbalanced optimal power flow for low-voltage distribution networks.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimal Power Flow
    #[clap(name = "opf")]
    Opf(OpfArgs),

    /// Print the buses and phases of the per-unit model
    #[clap(name = "model")]
    Model(ModelArgs),
}

#[derive(Args)]
struct OpfArgs {
    /// The network file
    #[arg(required = true)]
    input: PathBuf,

    /// Per-phase base power, in units of the scale factor.
    #[arg(long)]
    base_power: Option<f64>,

    /// Watts per engineering power unit.
    #[arg(long)]
    scale: Option<f64>,

    /// Lower phase voltage limit (p.u.).
    #[arg(long)]
    vmin: Option<f64>,

    /// Upper phase voltage limit (p.u.).
    #[arg(long)]
    vmax: Option<f64>,

    /// Limit on the voltage unbalance factor |V2|/|V1|.
    #[arg(long)]
    vuf_max: Option<f64>,

    /// Solver print level.
    #[arg(long)]
    print_level: Option<usize>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    max_it: Option<usize>,

    /// Generator given the linear cost.
    #[arg(long)]
    gen_id: Option<String>,

    /// Reject inconsistent limits before solving.
    #[arg(long, default_value_t = false)]
    check_bounds: bool,

    /// Print the raw solution.
    #[arg(long, default_value_t = false)]
    dump: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// The network file
    #[arg(required = true)]
    input: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(true) => {
            std::process::exit(0);
        }
        Ok(false) => {
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(2);
        }
    }
}

// Returns whether the run converged.
fn execute(cli: &Cli) -> Result<bool> {
    match &cli.command {
        Commands::Opf(args) => opf(args),
        Commands::Model(args) => {
            let mut eng = parse_file(&args.input)?;
            let (_, math) = initialize(&mut eng, &Configuration::default())?;

            println!("{}: {} buses", math.name, math.bus.len());
            for bus in &math.bus {
                let source = if bus.index == math.ref_bus { " (source)" } else { "" };
                println!(
                    "{:>4} {:<16} {:?} vbase={:.1} V{}",
                    bus.index, bus.name, bus.terminals, bus.vbase, source
                );
            }
            Ok(true)
        }
    }
}

fn opf(args: &OpfArgs) -> Result<bool> {
    let mut config = Configuration::default();
    if let Some(base_power) = args.base_power {
        config.base_power = base_power;
    }
    if let Some(scale) = args.scale {
        config.power_scale_factor = scale;
    }
    if let Some(vmin) = args.vmin {
        config.voltage_lower_bound = vmin;
    }
    if let Some(vmax) = args.vmax {
        config.voltage_upper_bound = vmax;
    }
    if let Some(print_level) = args.print_level {
        config.solver_verbosity = print_level;
    }
    if let Some(max_it) = args.max_it {
        config.max_iterations = max_it;
    }
    if let Some(gen_id) = &args.gen_id {
        config.generator_id = gen_id.clone();
    }
    config.tolerance = args.tol;
    config.unbalance_bound = args.vuf_max;
    config.check_bounds = args.check_bounds;

    let (raw, _, table) = solve_opf(&args.input, &config)?;
    let rep = report(&raw, &table);
    if args.dump {
        print!("{}", dump(&raw));
    }
    Ok(rep.convergence == lvopf::Convergence::Converged)
}
