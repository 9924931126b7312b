use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::fs::File;
use std::io::{self, BufReader};

use traffic_ctl::{
    config::{BackendKind, SimulationConfig},
    session::{run_script, ControlSession},
};

#[derive(Parser)]
#[command(name = "traffic-ctl")]
#[command(about = "Stepped traffic simulation driven by JSON-line commands")]
struct Args {
    /// Network description file
    #[arg(short, long, default_value = "network.toml")]
    network: String,

    /// Session configuration file
    #[arg(short = 'c', long, default_value = "session.toml")]
    session: String,

    /// Command script, one JSON command per line (reads stdin when omitted)
    #[arg(short = 'f', long)]
    script: Option<String>,

    /// Random seed for reproducible speed factors
    #[arg(short, long)]
    seed: Option<u64>,

    /// Override the motion backend from the session file
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Enable verbose logging for per-tick details
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Backend {
    /// Acceleration-limited motion along lanes
    Kinematic,
    /// Entities only move when placed
    Stationary,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Kinematic => BackendKind::Kinematic,
            Backend::Stationary => BackendKind::Stationary,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();
    info!("Starting traffic control session");

    let mut config = SimulationConfig::load_from_files(&args.network, &args.session)?;
    if let Some(seed) = args.seed {
        config.session.simulation.seed = Some(seed);
    }
    if let Some(backend) = args.backend {
        config.session.simulation.backend = backend.into();
    }

    info!(
        "Network: {} ({} junctions, {} edges)",
        config.network.network.name,
        config.network.junctions.len(),
        config.network.edges.len()
    );
    if let Some(seed) = config.session.simulation.seed {
        info!("Random seed: {}", seed);
    }

    let mut session = ControlSession::new(&config)?;
    info!("Motion backend: {}", session.backend_name());

    let stdout = io::stdout();
    let summary = match &args.script {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening command script {}", path))?;
            run_script(&mut session, BufReader::new(file), stdout.lock())?
        }
        None => run_script(&mut session, io::stdin().lock(), stdout.lock())?,
    };

    info!(
        "Processed {} commands ({} failed), stopped at tick {} ({:.2}s)",
        summary.commands,
        summary.errors,
        session.tick(),
        session.time()
    );
    if session.performance().sample_count() > 0 {
        info!(
            "Average step time {:.3}ms ({:.0} steps/s)",
            session.performance().average_step_time().as_secs_f64() * 1000.0,
            session.performance().steps_per_second()
        );
    }

    session.close();
    Ok(())
}
