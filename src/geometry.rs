//! Molecular geometry with ghost-atom bookkeeping.
//!
//! This module provides the [`Geometry`] struct used throughout the workflow:
//! an ordered list of species labels, a flat Cartesian coordinate vector, and
//! the set of atom indices currently marked as ghost atoms. Ghost atoms
//! contribute basis functions but no nuclei or electrons; they are used for
//! counterpoise corrections during BSSE decomposition.
//!
//! Coordinates are stored in a `DVector<f64>` in the order
//! `[x1, y1, z1, x2, y2, z2, ...]`, in Angstroms.

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Error type for geometry file operations.
#[derive(Error, Debug)]
pub enum GeometryError {
    /// I/O error when reading or writing geometry files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed geometry data (bad coordinate tokens, truncated file)
    #[error("malformed geometry file: {0}")]
    Malformed(String),
}

/// Type alias for geometry operation results
type Result<T> = std::result::Result<T, GeometryError>;

/// A molecular geometry: species labels, positions, and ghost-atom flags.
///
/// Species and positions are index-aligned; `coords.len()` is always
/// `3 * num_atoms`. The ghost set holds indices into the atom list and is
/// always a subset of `0..num_atoms`. A single `Geometry` is owned by the
/// caller driving a workflow and is mutated in place, both by mode
/// perturbation and by re-reading the engine-produced geometry after each
/// run.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Species label for each atom, in order (e.g., "C", "H", "O")
    pub species: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, ...] in Angstroms
    pub coords: DVector<f64>,
    /// Indices of atoms currently marked as ghost atoms
    pub ghost: BTreeSet<usize>,
    /// Number of atoms
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from a species list and a flat coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != species.len() * 3`.
    pub fn new(species: Vec<String>, coords: Vec<f64>) -> Self {
        let num_atoms = species.len();
        assert_eq!(coords.len(), num_atoms * 3);
        Self {
            species,
            coords: DVector::from_vec(coords),
            ghost: BTreeSet::new(),
            num_atoms,
        }
    }

    /// Read a geometry from an XYZ file.
    ///
    /// The first line carries the atom count and the second is free-text
    /// (engines write a description there); both are consumed positionally
    /// before the atom records. The returned geometry has an empty ghost set.
    pub fn from_xyz_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();

        let count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| {
                GeometryError::Malformed(format!("missing atom count in {}", path.display()))
            })?;
        lines.next(); // comment line, content is arbitrary

        let mut species = Vec::with_capacity(count);
        let mut coords = Vec::with_capacity(count * 3);
        for line in lines.take(count) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(GeometryError::Malformed(format!(
                    "truncated atom record `{line}`"
                )));
            }
            species.push(parts[0].to_string());
            for &coord_str in &parts[1..4] {
                coords.push(coord_str.parse().map_err(|_| {
                    GeometryError::Malformed(format!("invalid coordinate `{coord_str}`"))
                })?);
            }
        }
        if species.len() != count {
            return Err(GeometryError::Malformed(format!(
                "{} lists {count} atoms but holds {}",
                path.display(),
                species.len()
            )));
        }
        Ok(Self::new(species, coords))
    }

    /// Replace species and coordinates by re-reading an XYZ file in place.
    ///
    /// The ghost set is left untouched. Used after each engine run to pick up
    /// the engine's optimized geometry.
    pub fn reload_xyz(&mut self, path: &Path) -> Result<()> {
        let fresh = Self::from_xyz_file(path)?;
        self.species = fresh.species;
        self.coords = fresh.coords;
        self.num_atoms = fresh.num_atoms;
        Ok(())
    }

    /// Write the geometry to an XYZ file (atom count, blank comment, atom lines).
    pub fn write_xyz(&self, path: &Path) -> Result<()> {
        let mut content = format!("{}\n\n", self.num_atoms);
        for i in 0..self.num_atoms {
            let [x, y, z] = self.atom_coords(i);
            let _ = writeln!(content, "{}  {:.8}  {:.8}  {:.8}", self.species[i], x, y, z);
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Cartesian coordinates of one atom as `[x, y, z]`.
    pub fn atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Whether the atom at `atom_idx` is currently a ghost atom.
    pub fn is_ghost(&self, atom_idx: usize) -> bool {
        self.ghost.contains(&atom_idx)
    }

    /// Displace every atom along a normal-mode displacement matrix.
    ///
    /// `mode` must have one row per atom and three columns; the new positions
    /// are `coords + scale * mode`, elementwise. Ghost flags are unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the mode shape does not match the atom count.
    pub fn perturb_along_mode(&mut self, mode: &DMatrix<f64>, scale: f64) {
        assert_eq!(mode.nrows(), self.num_atoms);
        assert_eq!(mode.ncols(), 3);
        for i in 0..self.num_atoms {
            for k in 0..3 {
                self.coords[i * 3 + k] += scale * mode[(i, k)];
            }
        }
    }
}
