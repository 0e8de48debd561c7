//! orcaflow command-line interface.
//!
//! Runs the workflow described by an INI job file:
//!
//! ```bash
//! # Self-correcting geometry optimization
//! orcaflow job.ini
//! ```
//!
//! The job kind (`opt`, `sp`, or `bsse`) and all calculation settings live
//! in the job file; see the [`config`](orcaflow::config) module for the
//! format. The engine executable comes from the job file's `[engine]`
//! section or the `ORCA_EXEC` environment variable.

use log::info;
use orcaflow::bsse;
use orcaflow::config::{self, EngineConfig, JobKind};
use orcaflow::engine::{Engine, OUTPUT_FILE};
use orcaflow::geometry::Geometry;
use orcaflow::parser::OutputParser;
use orcaflow::summary::{RunSummary, SUMMARY_FILE};
use orcaflow::workflow::GeometryOptimizer;
use std::env;
use std::path::Path;
use std::process;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    if let Err(e) = run_job(Path::new(&args[1])) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_job(job_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let job = config::load_job(job_path)?;
    let engine_config = match &job.engine_exec {
        Some(exec) => EngineConfig::new(exec),
        None => EngineConfig::from_env()?,
    };
    let engine = Engine::new(engine_config);
    let parser = OutputParser::new(job.profile);
    let mut geom = Geometry::from_xyz_file(&job.geometry_file)?;

    match job.kind {
        JobKind::Optimize => {
            let optimizer = GeometryOptimizer::new(&engine, parser, job.opt);
            let report = optimizer.optimize(&job.work_dir, &mut geom, &job.settings)?;
            info!(
                "optimization finished: {} runs, {} perturbations, E(SCF) = {:.8}",
                report.runs, report.perturbations, report.summary.scf_energy
            );
        }
        JobKind::SinglePoint => {
            engine.run_single_point(&job.work_dir, &geom, &job.settings, true)?;
            let summary = RunSummary::from_log(&parser, &job.work_dir.join(OUTPUT_FILE))?;
            summary.write_json(&job.work_dir.join(SUMMARY_FILE))?;
            info!("single point finished: E(SCF) = {:.8}", summary.scf_energy);
        }
        JobKind::Bsse => {
            bsse::decompose(&engine, &job.work_dir, &geom, &job.settings, &job.monomers)?;
            info!("bsse decomposition finished: {} monomers", job.monomers.len());
        }
    }
    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <job.ini>");
    eprintln!();
    eprintln!("Runs the workflow described by the job file:");
    eprintln!("  kind = opt    self-correcting geometry optimization");
    eprintln!("  kind = sp     one single-point run");
    eprintln!("  kind = bsse   counterpoise decomposition into monomers");
    eprintln!();
    eprintln!("The engine executable is taken from the job file's [engine]");
    eprintln!("section or the ORCA_EXEC environment variable.");
}
