use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use env_logger::Builder;
use log::info;

use dslab_mapreduce::config::SimulationConfig;
use dslab_mapreduce::simulation::MapReduceSimulation;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs simulation of MapReduce requests in hybrid clouds
struct Args {
    /// Path to YAML file with simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for tasks.csv, requests.csv and report.json (not saved if not set)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Random seed
    #[arg(short, long, default_value_t = 123)]
    seed: u64,

    /// Do not print the summary tables
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config = SimulationConfig::from_file(&args.config)?;
    let mut sim = MapReduceSimulation::new(args.seed, config)?;

    let t = Instant::now();
    let report = sim.run();
    info!(
        "Simulated {:.2}s with {} events in {:.2}s",
        sim.time(),
        sim.event_count(),
        t.elapsed().as_secs_f64()
    );

    if !args.quiet {
        report.print_summary();
    }
    if let Some(dir) = args.output_dir {
        std::fs::create_dir_all(&dir)?;
        report.save_tasks_csv(dir.join("tasks.csv"))?;
        report.save_requests_csv(dir.join("requests.csv"))?;
        report.save_json(dir.join("report.json"))?;
        info!("Saved report to {}", dir.display());
    }
    Ok(())
}
