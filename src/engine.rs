//! Input deck generation and external engine execution.
//!
//! Every sub-run lives in its own directory holding a fixed trio of files:
//! the input deck ([`INPUT_FILE`]), the captured engine log ([`OUTPUT_FILE`]),
//! and the engine-written optimized geometry ([`GEOMETRY_FILE`]). The engine
//! is invoked synchronously with the deck filename as its sole argument and
//! stdout/stderr redirected into the log; a hung engine blocks the caller.
//!
//! The working directory is passed explicitly to every call via
//! `Command::current_dir` — the process-wide current directory is never
//! changed, so parsers and controllers can address run files by full path.

use crate::config::{EngineConfig, JobSettings};
use crate::geometry::Geometry;
use log::{debug, info};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Input deck filename inside a run directory.
pub const INPUT_FILE: &str = "ORCA_run.inp";
/// Captured engine log filename inside a run directory.
pub const OUTPUT_FILE: &str = "ORCA_output.txt";
/// Engine-written geometry filename inside a run directory.
pub const GEOMETRY_FILE: &str = "ORCA_run.xyz";

/// Error type for engine execution.
#[derive(Error, Debug)]
pub enum EngineError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The engine exited with a non-zero status
    #[error("engine run in `{dir}` failed with {status}")]
    Failed {
        /// Run directory of the failed invocation
        dir: String,
        /// Exit status reported by the operating system
        status: std::process::ExitStatus,
    },
}

/// Type alias for engine operation results
type Result<T> = std::result::Result<T, EngineError>;

/// Kind of calculation requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    /// Single-point energy evaluation
    SinglePoint,
    /// Geometry optimization followed by a numerical frequency analysis
    Optimization,
}

/// Write an engine input deck.
///
/// Ghost atoms carry a `:` suffix on the species label so the engine keeps
/// their basis functions without nuclei or electrons. With
/// `include_ghost = false` the ghost atoms are omitted from the deck
/// entirely (the monomer's own reduced basis).
pub fn write_input(
    path: &Path,
    geom: &Geometry,
    settings: &JobSettings,
    run_type: RunType,
    include_ghost: bool,
) -> Result<()> {
    let (comment, mode) = match run_type {
        RunType::SinglePoint => ("# Single point ORCA input file.", "SP"),
        RunType::Optimization => ("# Geometry ORCA input file.", "OPT NUMFREQ"),
    };

    let mut deck = String::new();
    let _ = writeln!(deck, "{comment}");
    let keywords: Vec<&str> = [settings.method.as_str(), settings.addons.as_str(), settings.basis.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let _ = writeln!(deck, "! {}", keywords.join(" "));
    let _ = writeln!(deck, "! {mode}");
    deck.push('\n');

    if let Some(solvent) = &settings.solvent {
        let _ = writeln!(deck, "%CPCM");
        let _ = writeln!(deck, "    SMD True");
        let _ = writeln!(deck, "    SMDSolvent \"{solvent}\"");
        let _ = writeln!(deck, "END");
        deck.push('\n');
    }

    let _ = writeln!(deck, "%PAL NPROCS {} END", settings.nprocs);
    deck.push('\n');

    let _ = writeln!(deck, "* xyz {} {}", settings.charge, settings.spin);
    for i in 0..geom.num_atoms {
        let [x, y, z] = geom.atom_coords(i);
        if geom.is_ghost(i) {
            if include_ghost {
                let _ = writeln!(deck, "{}:  {:.8}  {:.8}  {:.8}", geom.species[i], x, y, z);
            }
        } else {
            let _ = writeln!(deck, "{}  {:.8}  {:.8}  {:.8}", geom.species[i], x, y, z);
        }
    }
    let _ = writeln!(deck, "*");

    fs::write(path, deck)?;
    Ok(())
}

/// Synchronous runner for the external engine.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create a runner for the configured engine executable.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Materialize `dir`, write the input deck, and run the engine in it.
    ///
    /// Blocks until the engine exits. Stdout and stderr are both captured
    /// into [`OUTPUT_FILE`]. A non-zero exit status is fatal; the log file
    /// is left in place for post-mortem inspection.
    pub fn run(
        &self,
        dir: &Path,
        geom: &Geometry,
        settings: &JobSettings,
        run_type: RunType,
        include_ghost: bool,
    ) -> Result<()> {
        fs::create_dir_all(dir)?;
        write_input(&dir.join(INPUT_FILE), geom, settings, run_type, include_ghost)?;

        debug!(
            "launching {} in {}",
            self.config.exec.display(),
            dir.display()
        );
        let log = fs::File::create(dir.join(OUTPUT_FILE))?;
        let log_err = log.try_clone()?;
        let status = Command::new(&self.config.exec)
            .arg(INPUT_FILE)
            .current_dir(dir)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .status()?;

        if !status.success() {
            return Err(EngineError::Failed {
                dir: dir.display().to_string(),
                status,
            });
        }
        info!("engine run in {} finished", dir.display());
        Ok(())
    }

    /// Single-point run, optionally including ghost-atom basis functions.
    pub fn run_single_point(
        &self,
        dir: &Path,
        geom: &Geometry,
        settings: &JobSettings,
        include_ghost: bool,
    ) -> Result<()> {
        self.run(dir, geom, settings, RunType::SinglePoint, include_ghost)
    }

    /// Geometry-optimization run with frequency analysis.
    pub fn run_optimization(
        &self,
        dir: &Path,
        geom: &Geometry,
        settings: &JobSettings,
    ) -> Result<()> {
        self.run(dir, geom, settings, RunType::Optimization, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSettings;

    fn dimer() -> Geometry {
        let mut geom = Geometry::new(
            vec!["He".to_string(), "He".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 3.0],
        );
        geom.ghost.insert(1);
        geom
    }

    fn settings() -> JobSettings {
        JobSettings {
            method: "B3LYP".to_string(),
            basis: "def2-SVP".to_string(),
            addons: "D3BJ".to_string(),
            ..JobSettings::default()
        }
    }

    #[test]
    fn test_deck_layout_for_optimization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_FILE);
        write_input(&path, &dimer(), &settings(), RunType::Optimization, true).unwrap();
        let deck = std::fs::read_to_string(&path).unwrap();

        assert!(deck.contains("! B3LYP D3BJ def2-SVP\n"));
        assert!(deck.contains("! OPT NUMFREQ\n"));
        assert!(deck.contains("%PAL NPROCS 1 END\n"));
        assert!(deck.contains("* xyz 0 1\n"));
        assert!(deck.contains("He:  "));
        assert!(deck.trim_end().ends_with('*'));
        // Gas phase: no solvent block.
        assert!(!deck.contains("%CPCM"));
    }

    #[test]
    fn test_ghost_atoms_excluded_from_reduced_basis_deck() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_FILE);
        write_input(&path, &dimer(), &settings(), RunType::SinglePoint, false).unwrap();
        let deck = std::fs::read_to_string(&path).unwrap();

        assert!(deck.contains("! SP\n"));
        assert!(!deck.contains("He:"));
        // Exactly one atom line between the xyz header and the terminator.
        let atoms = deck
            .lines()
            .skip_while(|l| !l.starts_with("* xyz"))
            .skip(1)
            .take_while(|l| *l != "*")
            .count();
        assert_eq!(atoms, 1);
    }

    #[test]
    fn test_solvent_block_present_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_FILE);
        let mut settings = settings();
        settings.solvent = Some("water".to_string());
        write_input(&path, &dimer(), &settings, RunType::SinglePoint, true).unwrap();
        let deck = std::fs::read_to_string(&path).unwrap();

        assert!(deck.contains("%CPCM\n"));
        assert!(deck.contains("SMDSolvent \"water\"\n"));
    }
}
