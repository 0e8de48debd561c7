//! Job configuration: calculation settings, engine location, and job files.
//!
//! A workflow is described by an INI job file:
//!
//! ```ini
//! [job]
//! kind = opt            # opt | sp | bsse
//! geometry = water.xyz
//! dir = runs
//!
//! [engine]
//! exec = /opt/orca/orca # optional, falls back to the ORCA_EXEC variable
//! profile = zeroing     # zeroing | strict parser profile
//!
//! [calculation]
//! method = B3LYP
//! basis = def2-SVP
//! charge = 0
//! spin = 1
//! nprocs = 4
//! solvent = water
//! addons = D3BJ
//!
//! [optimization]
//! max_runs = 25
//! perturbation_scale = 0.5
//!
//! [monomer.a]           # bsse jobs only; atom indices are 1-based
//! atoms = 1-2
//! charge = 0
//! ```
//!
//! The engine executable location is threaded explicitly through
//! [`EngineConfig`] rather than read from process-wide state at load time,
//! so tests can substitute a fake engine.

use crate::bsse::Monomer;
use crate::parser::ParserProfile;
use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the engine executable.
pub const ENGINE_PATH_VAR: &str = "ORCA_EXEC";

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading the job file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    Ini(String),
    /// A required key is missing
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
    /// A key holds an unusable value
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// No engine executable configured and the environment variable is unset
    #[error("no engine executable: set [engine] exec or the {ENGINE_PATH_VAR} variable")]
    MissingEngine,
}

/// Type alias for configuration results
type Result<T> = std::result::Result<T, ConfigError>;

/// Named calculation options for one engine run.
///
/// Defaults when absent from the job file: charge 0, spin 1, nprocs 1,
/// no solvent, empty addons. Immutable per run; BSSE decomposition clones
/// and overrides per monomer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Quantum chemistry method (e.g., "B3LYP")
    pub method: String,
    /// Basis set (e.g., "def2-SVP")
    pub basis: String,
    /// Net charge
    pub charge: i32,
    /// Spin multiplicity (2S+1)
    pub spin: u32,
    /// Number of processors for the engine
    pub nprocs: u32,
    /// Implicit solvent name, or `None` for gas phase
    pub solvent: Option<String>,
    /// Additional keywords appended to the method line
    pub addons: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            method: String::new(),
            basis: String::new(),
            charge: 0,
            spin: 1,
            nprocs: 1,
            solvent: None,
            addons: String::new(),
        }
    }
}

/// Location of the external engine executable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine executable
    pub exec: PathBuf,
}

impl EngineConfig {
    /// Engine at an explicit path.
    pub fn new(exec: impl Into<PathBuf>) -> Self {
        Self { exec: exec.into() }
    }

    /// Engine located through the `ORCA_EXEC` environment variable.
    pub fn from_env() -> Result<Self> {
        match env::var(ENGINE_PATH_VAR) {
            Ok(path) if !path.is_empty() => Ok(Self::new(path)),
            _ => Err(ConfigError::MissingEngine),
        }
    }
}

/// Knobs for the optimization retry loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptSettings {
    /// Hard cap on engine runs before the loop fails as stalled
    pub max_runs: usize,
    /// Scale factor applied to the imaginary-mode displacement
    pub perturbation_scale: f64,
}

impl Default for OptSettings {
    fn default() -> Self {
        Self {
            max_runs: 25,
            perturbation_scale: 0.5,
        }
    }
}

/// What a job file asks the workflow to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Self-correcting geometry optimization
    Optimize,
    /// One single-point run
    SinglePoint,
    /// BSSE decomposition into monomer sub-runs
    Bsse,
}

/// A fully parsed job file.
#[derive(Debug, Clone)]
pub struct JobFile {
    /// Requested workflow
    pub kind: JobKind,
    /// Calculation settings shared by all sub-runs
    pub settings: JobSettings,
    /// Optimization loop settings
    pub opt: OptSettings,
    /// Path to the starting geometry (XYZ)
    pub geometry_file: PathBuf,
    /// Base directory for all sub-run directories
    pub work_dir: PathBuf,
    /// Engine executable from the job file, if given
    pub engine_exec: Option<PathBuf>,
    /// Output parser profile
    pub profile: ParserProfile,
    /// Monomer definitions for BSSE jobs, ordered by label
    pub monomers: Vec<Monomer>,
}

/// Parse a job file.
///
/// Section and key names are case-insensitive (lowercased by the INI
/// loader); monomer labels therefore come back lowercased too.
pub fn load_job(path: &Path) -> Result<JobFile> {
    let mut ini = Ini::new();
    let map = ini.load(path).map_err(ConfigError::Ini)?;

    let settings = JobSettings {
        method: ini
            .get("calculation", "method")
            .ok_or(ConfigError::MissingKey("calculation.method"))?,
        basis: ini
            .get("calculation", "basis")
            .ok_or(ConfigError::MissingKey("calculation.basis"))?,
        charge: get_i32(&ini, "calculation", "charge")?.unwrap_or(0),
        spin: get_u32(&ini, "calculation", "spin")?.unwrap_or(1),
        nprocs: get_u32(&ini, "calculation", "nprocs")?.unwrap_or(1),
        solvent: ini
            .get("calculation", "solvent")
            .filter(|s| !s.is_empty() && s != "none"),
        addons: ini.get("calculation", "addons").unwrap_or_default(),
    };

    let kind = match ini.get("job", "kind").as_deref() {
        None | Some("opt") => JobKind::Optimize,
        Some("sp") | Some("energy") => JobKind::SinglePoint,
        Some("bsse") => JobKind::Bsse,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!("unknown job kind `{other}`")))
        }
    };

    let geometry_file = ini
        .get("job", "geometry")
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingKey("job.geometry"))?;
    let work_dir = ini
        .get("job", "dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("runs"));

    let engine_exec = ini.get("engine", "exec").map(PathBuf::from);
    let profile = match ini.get("engine", "profile").as_deref() {
        None | Some("zeroing") => ParserProfile::zeroing(),
        Some("strict") => ParserProfile::strict(),
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "unknown parser profile `{other}`"
            )))
        }
    };

    let opt = OptSettings {
        max_runs: get_usize(&ini, "optimization", "max_runs")?
            .unwrap_or_else(|| OptSettings::default().max_runs),
        perturbation_scale: get_float(&ini, "optimization", "perturbation_scale")?
            .unwrap_or_else(|| OptSettings::default().perturbation_scale),
    };

    let mut monomers = Vec::new();
    for section in map.keys() {
        if let Some(label) = section.strip_prefix("monomer.") {
            let atoms_spec = ini
                .get(section, "atoms")
                .ok_or(ConfigError::MissingKey("monomer atoms"))?;
            monomers.push(Monomer {
                label: label.to_string(),
                atoms: parse_atom_list(&atoms_spec)?,
                charge: get_i32(&ini, section, "charge")?.unwrap_or(0),
            });
        }
    }
    // The INI map has no stable section order; keep monomer order deterministic.
    monomers.sort_by(|a, b| a.label.cmp(&b.label));
    if kind == JobKind::Bsse && monomers.is_empty() {
        return Err(ConfigError::MissingKey("monomer sections for a bsse job"));
    }

    Ok(JobFile {
        kind,
        settings,
        opt,
        geometry_file,
        work_dir,
        engine_exec,
        profile,
        monomers,
    })
}

/// Parse a 1-based atom list like `1-3,5` into 0-based indices.
fn parse_atom_list(spec: &str) -> Result<BTreeSet<usize>> {
    let mut atoms = BTreeSet::new();
    for group in spec.split(',') {
        let group = group.trim();
        if let Some((start, end)) = group.split_once('-') {
            let start: usize = parse_atom_index(start)?;
            let end: usize = parse_atom_index(end)?;
            if start > end {
                return Err(ConfigError::InvalidValue(format!(
                    "backwards atom range `{group}`"
                )));
            }
            atoms.extend(start - 1..end);
        } else {
            atoms.insert(parse_atom_index(group)? - 1);
        }
    }
    Ok(atoms)
}

fn parse_atom_index(token: &str) -> Result<usize> {
    match token.trim().parse::<usize>() {
        Ok(index) if index >= 1 => Ok(index),
        _ => Err(ConfigError::InvalidValue(format!(
            "invalid atom index `{}` (indices are 1-based)",
            token.trim()
        ))),
    }
}

fn get_i32(ini: &Ini, section: &str, key: &str) -> Result<Option<i32>> {
    match ini.getint(section, key).map_err(ConfigError::Ini)? {
        Some(v) => Ok(Some(i32::try_from(v).map_err(|_| out_of_range(section, key, v))?)),
        None => Ok(None),
    }
}

fn get_u32(ini: &Ini, section: &str, key: &str) -> Result<Option<u32>> {
    match ini.getuint(section, key).map_err(ConfigError::Ini)? {
        Some(v) => Ok(Some(u32::try_from(v).map_err(|_| out_of_range(section, key, v))?)),
        None => Ok(None),
    }
}

fn get_usize(ini: &Ini, section: &str, key: &str) -> Result<Option<usize>> {
    match ini.getuint(section, key).map_err(ConfigError::Ini)? {
        Some(v) => Ok(Some(usize::try_from(v).map_err(|_| out_of_range(section, key, v))?)),
        None => Ok(None),
    }
}

fn out_of_range(section: &str, key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue(format!("{section}.{key} = {value} is out of range"))
}

fn get_float(ini: &Ini, section: &str, key: &str) -> Result<Option<f64>> {
    ini.getfloat(section, key).map_err(ConfigError::Ini)
}
