//! The self-correcting geometry-optimization loop.
//!
//! The controller sequences engine runs in numbered subdirectories (`run0`,
//! `run1`, ...) under a base directory and classifies each outcome:
//!
//! - not converged: re-run, continuing from the engine's last geometry;
//! - converged but with an imaginary vibrational mode: perturb the geometry
//!   along the most negative mode and re-run (escaping the saddle point);
//! - converged with an all-real spectrum: done.
//!
//! On completion the winning run's log is copied to the base directory as
//! the canonical output, the final geometry and a JSON result summary are
//! written next to it. Every transition is appended as a human-readable
//! line to `run.log` in the base directory.
//!
//! The loop is bounded: exceeding the configured run cap fails with
//! [`WorkflowError::Stalled`] instead of retrying forever.

use crate::config::{JobSettings, OptSettings};
use crate::engine::{Engine, EngineError, GEOMETRY_FILE, OUTPUT_FILE};
use crate::geometry::{Geometry, GeometryError};
use crate::parser::{OutputParser, ParseError};
use crate::summary::{RunSummary, SUMMARY_FILE};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Append-only transition log filename in the base directory.
pub const RUN_LOG_FILE: &str = "run.log";

/// Error type for the optimization workflow.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Engine invocation failed
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Engine output could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Geometry file could not be read or written
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// The retry cap was reached without a clean minimum
    #[error("optimization stalled after {runs} engine runs without a clean minimum")]
    Stalled {
        /// Number of engine runs attempted
        runs: usize,
    },
}

/// Type alias for workflow results
type Result<T> = std::result::Result<T, WorkflowError>;

/// Classified outcome of one engine run.
///
/// `all_real` is `None` when the spectrum cannot be judged: the run did not
/// converge, or no vibrational analysis section was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Whether the optimization-converged marker was found
    pub converged: bool,
    /// Ternary spectrum-realness verdict
    pub all_real: Option<bool>,
}

/// What the finished loop did.
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    /// Total engine runs executed
    pub runs: usize,
    /// How many of those followed an imaginary-mode perturbation
    pub perturbations: usize,
    /// Directory of the winning run
    pub final_run_dir: PathBuf,
    /// Parsed results of the winning run
    pub summary: RunSummary,
}

/// Drives the convergence/imaginary-mode retry loop.
pub struct GeometryOptimizer<'a> {
    engine: &'a Engine,
    parser: OutputParser,
    opts: OptSettings,
}

impl<'a> GeometryOptimizer<'a> {
    /// Create a controller over the given engine and parser.
    pub fn new(engine: &'a Engine, parser: OutputParser, opts: OptSettings) -> Self {
        Self {
            engine,
            parser,
            opts,
        }
    }

    /// Optimize `geom` under `base_dir` until the engine reports a converged
    /// geometry with an all-real vibrational spectrum.
    ///
    /// `geom` is mutated in place: after every run it is overwritten with
    /// the engine's latest geometry, and perturbation displaces it along the
    /// offending mode. On success the final geometry is also written to the
    /// base directory and the winning log copied there.
    pub fn optimize(
        &self,
        base_dir: &Path,
        geom: &mut Geometry,
        settings: &JobSettings,
    ) -> Result<OptimizationReport> {
        fs::create_dir_all(base_dir)?;
        let log_path = base_dir.join(RUN_LOG_FILE);

        let mut runs = 0;
        let mut perturbations = 0;
        let mut action = "starting run".to_string();
        let final_run_dir = loop {
            if runs == self.opts.max_runs {
                log_event(&log_path, &format!("giving up after {runs} runs"))?;
                return Err(WorkflowError::Stalled { runs });
            }
            let label = format!("run{runs}");
            let run_dir = base_dir.join(&label);
            log_event(&log_path, &format!("{label}: {action}"))?;

            self.engine.run_optimization(&run_dir, geom, settings)?;
            geom.reload_xyz(&run_dir.join(GEOMETRY_FILE))?;
            runs += 1;

            let output = run_dir.join(OUTPUT_FILE);
            let outcome = RunOutcome {
                converged: self.parser.is_converged(&output)?,
                all_real: self.parser.all_modes_real(&output)?,
            };
            if !outcome.converged {
                action = "attempting to reach convergence".to_string();
                continue;
            }
            match outcome.all_real {
                Some(true) => break run_dir,
                None => {
                    // Converged but the engine produced no vibrational
                    // analysis to judge; accept the geometry as-is.
                    warn!("{label}: converged without vibrational data");
                    break run_dir;
                }
                Some(false) => {
                    let mode = self.perturb(&output, geom)?;
                    perturbations += 1;
                    action = format!("correcting imaginary mode {mode}");
                }
            }
        };

        fs::copy(final_run_dir.join(OUTPUT_FILE), base_dir.join(OUTPUT_FILE))?;
        geom.write_xyz(&base_dir.join(GEOMETRY_FILE))?;
        let summary = RunSummary::from_log(&self.parser, &final_run_dir.join(OUTPUT_FILE))?;
        summary.write_json(&base_dir.join(SUMMARY_FILE))?;
        log_event(
            &log_path,
            &format!("optimization complete after {runs} runs"),
        )?;

        Ok(OptimizationReport {
            runs,
            perturbations,
            final_run_dir,
            summary,
        })
    }

    /// Displace `geom` along the most negative mode of the given run log.
    ///
    /// The offending mode is the first frequency with a negative value, by
    /// ascending index. Returns the perturbed mode index.
    fn perturb(&self, output: &Path, geom: &mut Geometry) -> Result<usize> {
        let frequencies = self.parser.frequencies(output)?;
        let mode_idx = frequencies
            .iter()
            .position(|&f| f < 0.0)
            .ok_or_else(|| {
                ParseError::MalformedData(
                    "imaginary mode flagged but no negative frequency listed".to_string(),
                )
            })?;
        let modes = self.parser.normal_modes(output)?;
        let displacement = modes.get(&mode_idx).ok_or_else(|| {
            ParseError::MalformedData(format!("no displacement block for mode {mode_idx}"))
        })?;
        geom.perturb_along_mode(displacement, self.opts.perturbation_scale);
        Ok(mode_idx)
    }
}

/// Append one event line to the run log and mirror it to the console log.
fn log_event(path: &Path, message: &str) -> std::io::Result<()> {
    info!("{message}");
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{message}")
}
