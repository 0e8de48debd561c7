//! Serialized results of a completed run.
//!
//! After the loop finishes, the winning log is parsed once more into a
//! [`RunSummary`] and written as JSON next to the canonical output, so
//! downstream tooling does not need to re-scan the free-text log.

use crate::parser::{OutputParser, ParseError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// JSON summary filename in the base directory.
pub const SUMMARY_FILE: &str = "ORCA_summary.json";

/// Scalar and spectrum results parsed from one engine log.
///
/// Thermochemistry terms are `None` when the log carries no frequency
/// analysis (single-point runs); the optional corrections follow the
/// parser profile's missing-value policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Final SCF energy in Hartree
    pub scf_energy: f64,
    /// Dispersion correction in Hartree, if printed
    pub dispersion_correction: Option<f64>,
    /// Solvent corrections (charge correction, free energy) in Hartree
    pub solvent_correction: Option<(f64, f64)>,
    /// Zero-point energy in Hartree
    pub zero_point_energy: Option<f64>,
    /// Thermal correction to the internal energy in Hartree
    pub thermal_internal_correction: Option<f64>,
    /// Thermal enthalpy correction in Hartree
    pub thermal_enthalpy_correction: Option<f64>,
    /// Final entropy term in Hartree
    pub entropy_term: Option<f64>,
    /// Vibrational frequencies in cm⁻¹, empty when not computed
    pub frequencies: Vec<f64>,
}

impl RunSummary {
    /// Parse a completed engine log into a summary.
    ///
    /// The SCF energy is mandatory; thermochemistry markers may legitimately
    /// be absent and map to `None`. Malformed matched lines still surface
    /// as errors.
    pub fn from_log(parser: &OutputParser, path: &Path) -> Result<Self, ParseError> {
        Ok(Self {
            scf_energy: parser.scf_energy(path)?,
            dispersion_correction: parser.dispersion_correction(path)?,
            solvent_correction: parser.solvent_correction(path)?,
            zero_point_energy: absent_ok(parser.zero_point_energy(path))?,
            thermal_internal_correction: absent_ok(parser.thermal_internal_correction(path))?,
            thermal_enthalpy_correction: absent_ok(parser.thermal_enthalpy_correction(path))?,
            entropy_term: absent_ok(parser.entropy_term(path))?,
            frequencies: absent_ok(parser.frequencies(path))?.unwrap_or_default(),
        })
    }

    /// Write the summary as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ParseError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ParseError::MalformedData(format!("summary serialization: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Map a missing-marker failure to `None`, keeping every other error.
fn absent_ok<T>(result: Result<T, ParseError>) -> Result<Option<T>, ParseError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ParseError::MissingMarker(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
