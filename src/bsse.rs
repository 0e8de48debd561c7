//! Counterpoise decomposition for basis-set superposition error.
//!
//! A multi-fragment system is partitioned into monomers; every atom outside
//! a monomer is masked as a ghost atom and two single-point sub-runs are
//! launched per monomer: one with the ghost basis functions in the deck
//! (the full counterpoise basis, directory `<label>-f_basis`) and one
//! without them (the monomer's own reduced basis, `<label>-r_basis`).
//!
//! Only the runs are launched here; the counterpoise-corrected interaction
//! energy is assembled downstream from the parsed per-run SCF energies.

use crate::config::JobSettings;
use crate::engine::{Engine, EngineError};
use crate::geometry::Geometry;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// One monomer of a multi-fragment system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monomer {
    /// Label naming the monomer's sub-run directories
    pub label: String,
    /// 0-based indices of the atoms belonging to this monomer
    pub atoms: BTreeSet<usize>,
    /// Net charge of the isolated monomer
    pub charge: i32,
}

/// Ghost mask for one monomer: every atom index not belonging to it.
pub fn ghost_mask(num_atoms: usize, monomer: &Monomer) -> BTreeSet<usize> {
    (0..num_atoms)
        .filter(|i| !monomer.atoms.contains(i))
        .collect()
}

/// Launch the full- and reduced-basis sub-runs for every monomer.
///
/// Per monomer the calculation settings are cloned with the monomer's
/// charge and solvent disabled (counterpoise terms are gas-phase). The
/// caller's geometry is not touched; each sub-run works on a masked clone.
pub fn decompose(
    engine: &Engine,
    base_dir: &Path,
    geom: &Geometry,
    settings: &JobSettings,
    monomers: &[Monomer],
) -> Result<(), EngineError> {
    for monomer in monomers {
        let mut mon_settings = settings.clone();
        mon_settings.charge = monomer.charge;
        mon_settings.solvent = None;

        let mut masked = geom.clone();
        masked.ghost = ghost_mask(geom.num_atoms, monomer);

        info!(
            "monomer {}: {} atoms, {} ghosts",
            monomer.label,
            monomer.atoms.len(),
            masked.ghost.len()
        );
        engine.run_single_point(
            &base_dir.join(format!("{}-f_basis", monomer.label)),
            &masked,
            &mon_settings,
            true,
        )?;
        engine.run_single_point(
            &base_dir.join(format!("{}-r_basis", monomer.label)),
            &masked,
            &mon_settings,
            false,
        )?;
    }
    Ok(())
}
