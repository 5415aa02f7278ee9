//! canoe-hub command line interface.
//!
//! `discover` lists the CANoe installations found on this machine, `paths`
//! shows where state and logs live, and `demo` drives a complete recording
//! run against the in-memory mock engine so the session flow can be
//! exercised without a CANoe installation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};

use canoe_hub::catalog::CatalogScanner;
use canoe_hub::config::Settings;
use canoe_hub::engine::mock::MockEngine;
use canoe_hub::matcher::is_engine_running;
use canoe_hub::persist::{AppPaths, AppState, VehicleCatalog};
use canoe_hub::probe::{NullInstallProbe, SysinfoProcessProbe};
use canoe_hub::resolver::ResolveTick;
use canoe_hub::session::{DiscardOutcome, SessionController};

#[derive(Parser)]
#[command(name = "canoe-hub", version, about = "Session core for CANoe recording runs")]
struct Cli {
    /// Settings file (defaults to canoe-hub.toml in the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for installed CANoe versions and print them.
    Discover,
    /// Show the state, catalog and log locations in use.
    Paths,
    /// Run a full recording session against the mock engine.
    Demo {
        /// Directory to write the demo run into.
        #[arg(long, default_value_os_t = std::env::temp_dir().join("canoe-hub-demo"))]
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Command::Discover => discover(&settings),
        Command::Paths => paths(),
        Command::Demo { dir } => demo(&settings, &dir),
    }
}

fn discover(settings: &Settings) -> anyhow::Result<()> {
    let probe = NullInstallProbe;
    let mut scanner = CatalogScanner::new(settings.effective_scan_roots(), &probe);
    let installations = scanner.discover();

    if installations.is_empty() {
        println!("No CANoe installations found.");
    } else {
        println!("{:<28} {:<12} {:<24} PATH", "LABEL", "VERSION", "ACTIVATION ID");
        for installation in &installations {
            let version = installation
                .version_hint
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(".");
            println!(
                "{:<28} {:<12} {:<24} {}",
                installation.label,
                if version.is_empty() { "-" } else { version.as_str() },
                installation.activation_id.as_deref().unwrap_or("-"),
                installation.executable.display()
            );
        }
    }

    let process_probe = SysinfoProcessProbe;
    if is_engine_running(&process_probe, None) {
        println!("\nA CANoe process is currently running.");
    }
    Ok(())
}

fn paths() -> anyhow::Result<()> {
    let app_paths = AppPaths::discover().context("resolving data directories")?;
    let state = AppState::load(&app_paths.state_file);

    println!("Data directory:  {}", app_paths.data_dir.display());
    println!("State file:      {}", app_paths.state_file.display());
    println!("Vehicle catalog: {}", app_paths.vehicles_file.display());
    let log_dir = state
        .log_root()
        .unwrap_or_else(|| app_paths.default_log_dir.clone());
    println!("Log directory:   {}", log_dir.display());
    Ok(())
}

fn demo(settings: &Settings, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).context("creating demo directory")?;

    let engine = MockEngine::new("15.3.45");
    engine.add_logging_sink("C:/demo/previous.blf");
    engine.add_video_sink("Cam1");
    engine.set_measurement_time(Some(0.0));

    let mut session = SessionController::new().with_resolver_budget(settings.resolve_attempts);
    session.adopt_engine(engine.handle());

    let meta = AppState {
        sw_rel: "R300RC1".into(),
        me_version: "2.0".into(),
        vehicle_id: "JUD79J".into(),
        tag: "demo".into(),
        log_dir: dir.to_string_lossy().into_owned(),
        ..AppState::default()
    };
    let vehicles = VehicleCatalog::from_entries([("JUD79J", "XC60")]);

    session
        .start(&meta, &vehicles, Local::now())
        .context("starting demo run")?;
    let folder = session
        .run_folder()
        .context("run folder missing after start")?
        .to_path_buf();
    println!("Recording into {}", folder.display());

    // The real engine writes this file itself once the measurement starts.
    let token = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    std::fs::write(
        folder.join(format!("R300RC1_XC60_Veh6_demo_{token}.blf")),
        b"demo log data",
    )
    .context("simulating engine output")?;

    loop {
        match session.resolver_tick() {
            Some(ResolveTick::Pending) => std::thread::sleep(Duration::from_millis(50)),
            Some(ResolveTick::Resolved { comment_path, suffix }) => {
                println!("Output resolved: suffix '{suffix}'");
                println!("Comment file:    {}", comment_path.display());
                break;
            }
            Some(ResolveTick::GaveUp { comment_path }) => {
                println!("Output not resolved; keeping {}", comment_path.display());
                break;
            }
            None => anyhow::bail!("no live run to resolve"),
        }
    }

    engine.set_measurement_time(Some(2.5));
    session.append_comment("demo comment at 2.5s")?;
    session.stop().context("stopping demo run")?;
    println!("Run stopped.");

    // Second run with its own tag (and thus folder), discarded instead of
    // kept.
    let meta = AppState {
        tag: "demo discard".into(),
        ..meta
    };
    session.start(&meta, &vehicles, Local::now())?;
    match session.discard(settings.settle_delay)? {
        DiscardOutcome::Discarded {
            deleted,
            failed,
            removed_folder,
        } => println!(
            "Discarded second run: {deleted} deleted, {failed} failed, folder removed: {removed_folder}"
        ),
        DiscardOutcome::NothingToDiscard => println!("Nothing to discard."),
    }
    Ok(())
}
