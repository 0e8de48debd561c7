//! Engine output parsing.
//!
//! The external engine writes a free-text log; this module extracts the
//! structured results the workflow needs by scanning the file line by line
//! and matching literal marker substrings:
//!
//! - convergence and spectrum-realness checks for the optimization loop
//! - scalar energies and thermochemistry terms (SCF energy, dispersion,
//!   solvent corrections, ZPE, thermal corrections, entropy)
//! - the ordered vibrational frequency list (one value per normal mode)
//! - per-atom normal-mode displacement matrices
//!
//! Engines print provisional values during intermediate optimization steps,
//! so every scalar extractor keeps the **last** matching line. Extractors
//! assume well-formed output: a matched line that does not tokenize as
//! expected surfaces as [`ParseError::MalformedData`] and is never silently
//! recovered, mirroring the engine's own fatal-error philosophy.
//!
//! Two engine versions are in circulation that differ in the imaginary-mode
//! marker text and in how an absent optional correction is reported; both
//! are exposed as [`ParserProfile`]s.

use lazy_static::lazy_static;
use nalgebra::DMatrix;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use thiserror::Error;

/// Marker line printed once the engine's geometry optimization converges.
pub const CONVERGENCE_MARKER: &str = "THE OPTIMIZATION HAS CONVERGED";
/// Section header for the vibrational analysis block.
pub const FREQUENCY_MARKER: &str = "VIBRATIONAL FREQUENCIES";
/// Section header for the normal-mode displacement block.
pub const NORMAL_MODE_MARKER: &str = "NORMAL MODES";

/// Header lines between the frequency marker and the first data line.
const FREQUENCY_HEADER_LINES: usize = 4;
/// Header lines between the normal-mode marker and the first block header.
const NORMAL_MODE_HEADER_LINES: usize = 6;

/// Error type for engine output parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    /// I/O error while reading the log file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// An expected marker line is absent from the engine output
    #[error("marker `{0}` not found in engine output")]
    MissingMarker(&'static str),
    /// A matched line did not tokenize or parse as expected
    #[error("malformed engine output: {0}")]
    MalformedData(String),
}

/// Type alias for parse operation results
type Result<T> = std::result::Result<T, ParseError>;

/// How an absent optional correction (dispersion, solvent) is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValuePolicy {
    /// Report the additive identity, `Some(0.0)`
    Zero,
    /// Report `None` so absence is never confused with a zero value
    Absent,
}

/// Marker text and missing-value policy for one engine version.
///
/// The two known engine versions print the imaginary-mode flag differently
/// and the corresponding downstream tooling historically defaulted absent
/// corrections differently. Neither behavior is guessed here; pick the
/// profile matching the engine in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserProfile {
    /// Literal substring flagging an imaginary vibrational mode
    pub imaginary_marker: &'static str,
    /// Policy for absent optional corrections
    pub missing_optional: MissingValuePolicy,
}

impl ParserProfile {
    /// Profile for engines printing a plain `imaginary mode` flag; absent
    /// optional corrections parse as `Some(0.0)`.
    pub fn zeroing() -> Self {
        Self {
            imaginary_marker: "imaginary mode",
            missing_optional: MissingValuePolicy::Zero,
        }
    }

    /// Profile for engines printing a starred `***imaginary mode***` flag;
    /// absent optional corrections parse as `None`.
    pub fn strict() -> Self {
        Self {
            imaginary_marker: "***imaginary mode***",
            missing_optional: MissingValuePolicy::Absent,
        }
    }
}

impl Default for ParserProfile {
    fn default() -> Self {
        Self::zeroing()
    }
}

lazy_static! {
    // Frequency data line: "   6:      1630.23 cm**-1"
    static ref FREQ_LINE_RE: Regex =
        Regex::new(r"^\s*\d+:\s+(-?(?:\d+\.\d*|\.\d+|\d+))").unwrap();
}

/// Line-oriented parser for engine log files.
///
/// All methods take the path to a completed log and scan it fresh; parsed
/// values are never cached across runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputParser {
    profile: ParserProfile,
}

impl OutputParser {
    /// Create a parser with an explicit engine profile.
    pub fn new(profile: ParserProfile) -> Self {
        Self { profile }
    }

    /// The active profile.
    pub fn profile(&self) -> ParserProfile {
        self.profile
    }

    /// Whether the optimization-converged marker appears anywhere in the log.
    ///
    /// Returns `false` (not an error) when the marker is absent; a log
    /// without the marker is a legitimate non-converged run.
    pub fn is_converged(&self, path: &Path) -> Result<bool> {
        contains_marker(path, CONVERGENCE_MARKER)
    }

    /// Ternary spectrum-realness check.
    ///
    /// Returns `None` when the run did not converge or when no vibrational
    /// analysis section is present (frequencies were not computed or are
    /// meaningless), `Some(false)` when the profile's imaginary-mode marker
    /// appears, and `Some(true)` otherwise. Convergence and section presence
    /// are evaluated as independent passes over the file.
    pub fn all_modes_real(&self, path: &Path) -> Result<Option<bool>> {
        if !self.is_converged(path)? {
            return Ok(None);
        }
        if !contains_marker(path, FREQUENCY_MARKER)? {
            return Ok(None);
        }
        if contains_marker(path, self.profile.imaginary_marker)? {
            return Ok(Some(false));
        }
        Ok(Some(true))
    }

    /// Final SCF energy in Hartree (last `Total Energy       :` line).
    pub fn scf_energy(&self, path: &Path) -> Result<f64> {
        self.scalar(path, "Total Energy       :", 3)
    }

    /// Dispersion correction in Hartree, if printed.
    ///
    /// An absent marker follows the profile's missing-value policy; see
    /// [`MissingValuePolicy`].
    pub fn dispersion_correction(&self, path: &Path) -> Result<Option<f64>> {
        match last_matching_line(path, "Dispersion correction")? {
            Some(line) => Ok(Some(token_as_float(&line, 2)?)),
            None => Ok(self.missing_optional()),
        }
    }

    /// Solvent corrections (charge correction, free energy) in Hartree, if
    /// printed. Follows the profile's missing-value policy when either
    /// marker is absent.
    pub fn solvent_correction(&self, path: &Path) -> Result<Option<(f64, f64)>> {
        let charge = last_matching_line(path, "Charge-correction       :")?;
        let free = last_matching_line(path, "Free-energy")?;
        match (charge, free) {
            (Some(charge), Some(free)) => {
                Ok(Some((token_as_float(&charge, 2)?, token_as_float(&free, 3)?)))
            }
            _ => Ok(self.missing_optional().map(|z| (z, z))),
        }
    }

    /// Zero-point energy in Hartree (last `(ZPE)` line).
    pub fn zero_point_energy(&self, path: &Path) -> Result<f64> {
        self.scalar(path, "(ZPE)", 3)
    }

    /// Thermal correction to the internal energy in Hartree.
    pub fn thermal_internal_correction(&self, path: &Path) -> Result<f64> {
        self.scalar(path, "Total thermal correction", 3)
    }

    /// Thermal enthalpy correction in Hartree.
    pub fn thermal_enthalpy_correction(&self, path: &Path) -> Result<f64> {
        self.scalar(path, "Thermal Enthalpy correction", 4)
    }

    /// Final entropy term in Hartree.
    pub fn entropy_term(&self, path: &Path) -> Result<f64> {
        self.scalar(path, "Final entropy term", 4)
    }

    /// Ordered vibrational frequencies in cm⁻¹, one per normal mode.
    ///
    /// For N atoms the list has 3N entries including the zero or near-zero
    /// translational and rotational modes; a negative sign encodes an
    /// imaginary mode. Reads the block following [`FREQUENCY_MARKER`] until
    /// the first blank line.
    pub fn frequencies(&self, path: &Path) -> Result<Vec<f64>> {
        let mut lines = open_lines(path)?;
        skip_to_marker(&mut lines, FREQUENCY_MARKER)?;
        skip_headers(&mut lines, FREQUENCY_HEADER_LINES)?;

        let mut frequencies = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                break;
            }
            let caps = FREQ_LINE_RE.captures(&line).ok_or_else(|| {
                ParseError::MalformedData(format!("unexpected frequency line `{line}`"))
            })?;
            frequencies.push(caps[1].parse().map_err(|_| {
                ParseError::MalformedData(format!("bad frequency value in `{line}`"))
            })?);
        }
        Ok(frequencies)
    }

    /// Normal-mode displacement matrices, keyed by mode index.
    ///
    /// The engine prints modes in blocks of up to six columns: a header line
    /// naming the mode indices, then one line per atomic coordinate carrying
    /// that coordinate's displacement component for each named mode. The
    /// block repeats until a blank line. Each returned matrix has one row
    /// per atom and three columns, and the key count equals 3N.
    pub fn normal_modes(&self, path: &Path) -> Result<HashMap<usize, DMatrix<f64>>> {
        let mut lines = open_lines(path)?;
        skip_to_marker(&mut lines, NORMAL_MODE_MARKER)?;
        skip_headers(&mut lines, NORMAL_MODE_HEADER_LINES)?;

        let mut columns: HashMap<usize, Vec<f64>> = HashMap::new();
        let mut current: Vec<usize> = Vec::new();
        for line in lines {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.len() {
                0 => break,
                // Block header naming the next 3 or 6 mode indices.
                3 | 6 => {
                    current = tokens
                        .iter()
                        .map(|t| {
                            t.parse::<usize>().map_err(|_| {
                                ParseError::MalformedData(format!(
                                    "bad mode index in header `{line}`"
                                ))
                            })
                        })
                        .collect::<Result<_>>()?;
                    for &mode in &current {
                        columns.entry(mode).or_default();
                    }
                }
                // Coordinate row: row index followed by one component per mode.
                4 | 7 => {
                    if tokens.len() != current.len() + 1 {
                        return Err(ParseError::MalformedData(format!(
                            "displacement row `{line}` does not match its block header"
                        )));
                    }
                    for (&mode, token) in current.iter().zip(&tokens[1..]) {
                        let value = token.parse().map_err(|_| {
                            ParseError::MalformedData(format!(
                                "bad displacement component in `{line}`"
                            ))
                        })?;
                        columns.entry(mode).or_default().push(value);
                    }
                }
                _ => {
                    return Err(ParseError::MalformedData(format!(
                        "unexpected normal-mode line `{line}`"
                    )))
                }
            }
        }

        let n_modes = columns.len();
        if n_modes == 0 || n_modes % 3 != 0 {
            return Err(ParseError::MalformedData(format!(
                "normal-mode section lists {n_modes} modes, expected a multiple of 3"
            )));
        }
        let n_atoms = n_modes / 3;
        let mut modes = HashMap::with_capacity(n_modes);
        for (mode, flat) in columns {
            if flat.len() != n_modes {
                return Err(ParseError::MalformedData(format!(
                    "mode {mode} has {} displacement components, expected {n_modes}",
                    flat.len()
                )));
            }
            modes.insert(mode, DMatrix::from_row_slice(n_atoms, 3, &flat));
        }
        Ok(modes)
    }

    /// Last-match scalar at a fixed token index; absent marker is an error.
    fn scalar(&self, path: &Path, marker: &'static str, token: usize) -> Result<f64> {
        let line =
            last_matching_line(path, marker)?.ok_or(ParseError::MissingMarker(marker))?;
        token_as_float(&line, token)
    }

    fn missing_optional(&self) -> Option<f64> {
        match self.profile.missing_optional {
            MissingValuePolicy::Zero => Some(0.0),
            MissingValuePolicy::Absent => None,
        }
    }
}

fn open_lines(path: &Path) -> Result<Lines<BufReader<File>>> {
    Ok(BufReader::new(File::open(path)?).lines())
}

/// Single streamed pass: does any line contain the marker?
fn contains_marker(path: &Path, marker: &str) -> Result<bool> {
    for line in open_lines(path)? {
        if line?.contains(marker) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Single streamed pass keeping the last line containing the marker.
fn last_matching_line(path: &Path, marker: &str) -> Result<Option<String>> {
    let mut last = None;
    for line in open_lines(path)? {
        let line = line?;
        if line.contains(marker) {
            last = Some(line);
        }
    }
    Ok(last)
}

fn skip_to_marker(lines: &mut Lines<BufReader<File>>, marker: &'static str) -> Result<()> {
    for line in lines.by_ref() {
        if line?.contains(marker) {
            return Ok(());
        }
    }
    Err(ParseError::MissingMarker(marker))
}

fn skip_headers(lines: &mut Lines<BufReader<File>>, count: usize) -> Result<()> {
    for _ in 0..count {
        match lines.next() {
            Some(line) => {
                line?;
            }
            None => {
                return Err(ParseError::MalformedData(
                    "section truncated inside its header".to_string(),
                ))
            }
        }
    }
    Ok(())
}

fn token_as_float(line: &str, index: usize) -> Result<f64> {
    let token = line.split_whitespace().nth(index).ok_or_else(|| {
        ParseError::MalformedData(format!("expected token {index} in `{line}`"))
    })?;
    token.parse().map_err(|_| {
        ParseError::MalformedData(format!("non-numeric token `{token}` in `{line}`"))
    })
}
