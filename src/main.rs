//! Command-line entry point: run, resume, inspect and control analysis runs.

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bipv_radiation::batch::{
    CheckpointManager, InvocationOutcome, NoopObserver, RequestOutcome, RunCommand, RunInputs, RunScheduler,
    RunSummary, SystemClock,
};
use bipv_radiation::config::AnalysisConfig;
use bipv_radiation::io::{export_csv, load_elements, load_walls, load_weather, write_csv};
use bipv_radiation::store::{PersistenceGateway, open_store};
use bipv_radiation::weather::synthetic_tmy;

#[derive(Parser)]
#[command(name = "bipv-radiation")]
#[command(about = "Resumable annual solar radiation analysis for building glazing")]
struct Cli {
    /// Load configuration from a TOML file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a built-in preset (standard, fast, detailed)
    #[arg(long, global = true)]
    preset: Option<String>,

    /// SQLite database holding runs and results
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Building element CSV
    #[arg(long)]
    elements: PathBuf,

    /// Wall element CSV for self-shading
    #[arg(long)]
    walls: Option<PathBuf>,

    /// Weather CSV (day_of_year,hour or timestamp; ghi,dni,dhi)
    #[arg(long, required_unless_present = "synthetic_weather", conflicts_with = "synthetic_weather")]
    weather: Option<PathBuf>,

    /// Generate a synthetic year with this seed instead of reading weather
    #[arg(long, value_name = "SEED")]
    synthetic_weather: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run (or continue an existing one with --run-id)
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Run id; a UUID is generated when omitted
        #[arg(long)]
        run_id: Option<String>,

        /// Export results to CSV when the invocation ends
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Continue a paused or timed-out run from its checkpoint
    Resume {
        run_id: String,

        #[command(flatten)]
        inputs: InputArgs,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show a run, clearing a stale execution lease if found
    Status { run_id: String },

    /// Request a pause at the next element boundary
    Pause { run_id: String },

    /// Request a stop; stopped runs cannot be resumed
    Stop { run_id: String },

    /// Print or export the results of a run
    Results {
        run_id: String,

        /// Write CSV here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Serve the control API (requires the `api` feature)
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

fn load_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut cfg = match (&cli.config, &cli.preset) {
        (Some(path), _) => AnalysisConfig::from_toml_file(path)?,
        (None, Some(name)) => AnalysisConfig::from_preset(name)?,
        (None, None) => AnalysisConfig::standard(),
    };
    if let Some(path) = &cli.store {
        cfg.store.backend = "sqlite".to_string();
        cfg.store.path = path.clone();
    }

    let errors = cfg.validate();
    if !errors.is_empty() {
        eprintln!("error: invalid configuration:");
        for e in &errors {
            eprintln!("  {e}");
        }
        process::exit(1);
    }
    Ok(cfg)
}

fn load_inputs(args: &InputArgs, cfg: &AnalysisConfig) -> Result<RunInputs> {
    let elements = load_elements(&args.elements)?;
    let walls = match &args.walls {
        Some(path) => load_walls(path)?,
        None => Vec::new(),
    };
    let weather = match (&args.weather, args.synthetic_weather) {
        (Some(path), _) => load_weather(path)?,
        (None, Some(seed)) => synthetic_tmy(cfg.site.latitude, seed),
        (None, None) => bail!("either --weather or --synthetic-weather is required"),
    };
    info!(
        elements = elements.len(),
        walls = walls.len(),
        weather_points = weather.len(),
        "inputs loaded"
    );
    Ok(RunInputs::new(elements, walls, weather)?)
}

fn export_results(gateway: &dyn PersistenceGateway, run_id: &str, out: Option<&PathBuf>) -> Result<()> {
    let results = gateway.load_results(run_id)?;
    match out {
        Some(path) => {
            export_csv(&results, path).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} results written to {}", results.len(), path.display());
        }
        None => write_csv(&results, io::stdout().lock())?,
    }
    Ok(())
}

/// Which run an invocation works on.
enum Target<'a> {
    Start(Option<&'a str>),
    Resume(&'a str),
}

fn execute(
    cfg: AnalysisConfig,
    gateway: Arc<dyn PersistenceGateway>,
    target: Target<'_>,
    inputs: &RunInputs,
    out: Option<&PathBuf>,
) -> Result<()> {
    let scheduler = RunScheduler::new(cfg, gateway.clone(), Arc::new(SystemClock));
    let report = match target {
        Target::Start(run_id) => scheduler.start(run_id, inputs, &mut NoopObserver)?,
        Target::Resume(run_id) => scheduler.resume(run_id, inputs, &mut NoopObserver)?,
    };

    println!("\n{}", report.summary);
    match report.outcome {
        InvocationOutcome::Completed => {}
        InvocationOutcome::Paused { next_index } | InvocationOutcome::TimedOut { next_index } => {
            eprintln!(
                "Run {} saved at element {next_index}; continue with `bipv-radiation resume {}`",
                report.run_id, report.run_id
            );
        }
        InvocationOutcome::Stopped { next_index } => {
            eprintln!("Run {} stopped at element {next_index}", report.run_id);
        }
    }
    if let Some(path) = out {
        export_results(gateway.as_ref(), &report.run_id, Some(path))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let gateway = open_store(&cfg.store)?;
    let checkpoints = CheckpointManager::new(gateway.clone(), Arc::new(SystemClock), &cfg.run);

    match cli.command {
        Commands::Run { inputs, run_id, out } => {
            let inputs = load_inputs(&inputs, &cfg)?;
            execute(cfg, gateway, Target::Start(run_id.as_deref()), &inputs, out.as_ref())?;
        }

        Commands::Resume { run_id, inputs, out } => {
            let inputs = load_inputs(&inputs, &cfg)?;
            execute(cfg, gateway, Target::Resume(&run_id), &inputs, out.as_ref())?;
        }

        Commands::Status { run_id } => {
            let report = checkpoints.check_status(&run_id)?;
            if let Some(reason) = report.stale {
                eprintln!("warning: stale run recovered ({reason}); resume to continue");
            }
            println!("{}", RunSummary::load(gateway.as_ref(), &report.run)?);
            println!("Progress:              {:.1}%", report.run.progress() * 100.0);
            println!("Next index:            {}", report.run.next_index);
            println!("Last heartbeat:        {}", report.run.last_heartbeat.to_rfc3339());
        }

        Commands::Pause { run_id } => report_request(checkpoints.request(&run_id, RunCommand::Pause)?),

        Commands::Stop { run_id } => report_request(checkpoints.request(&run_id, RunCommand::Stop)?),

        Commands::Results { run_id, out } => {
            checkpoints.load(&run_id)?;
            export_results(gateway.as_ref(), &run_id, out.as_ref())?;
        }

        Commands::Serve { port } => serve(gateway, cfg, port)?,
    }

    Ok(())
}

#[cfg(feature = "api")]
fn serve(gateway: Arc<dyn PersistenceGateway>, cfg: AnalysisConfig, port: u16) -> Result<()> {
    use std::net::SocketAddr;

    let state = Arc::new(bipv_radiation::api::AppState::new(gateway, Arc::new(SystemClock), cfg));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(bipv_radiation::api::serve(state, addr))?;
    Ok(())
}

#[cfg(not(feature = "api"))]
fn serve(_gateway: Arc<dyn PersistenceGateway>, _cfg: AnalysisConfig, port: u16) -> Result<()> {
    bail!("cannot serve on port {port}: built without the `api` feature")
}

fn report_request(outcome: RequestOutcome) {
    match outcome {
        RequestOutcome::Applied(status) => println!("Run is now {status}"),
        RequestOutcome::Deferred => println!("Request stored; the running invocation takes it at its next element"),
    }
}
