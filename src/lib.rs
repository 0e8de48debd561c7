#![deny(missing_docs)]

//! orcaflow - Workflow Automation for ORCA-style Quantum Chemistry Engines
//!
//! orcaflow drives an external quantum-chemistry engine through complete
//! workflows: it generates input decks, launches the engine as a subprocess,
//! parses the free-text log into structured numeric results, and uses those
//! results to steer a self-correcting geometry optimization.
//!
//! # Pipeline
//!
//! ```text
//! controller -> run directory -> engine -> log file -> parser -> decision
//!      ^                                                            |
//!      +--------------- geometry perturbation <--------------------+
//! ```
//!
//! The optimization controller classifies every run: non-convergent runs are
//! retried from the engine's latest geometry, converged runs with an
//! imaginary vibrational mode are perturbed along the offending normal mode
//! and re-run, and a converged run with an all-real spectrum terminates the
//! loop. A bounded retry cap turns silent non-termination into a terminal
//! error.
//!
//! The BSSE module partitions a multi-fragment system into monomers with
//! ghost-atom masking and launches the counterpoise sub-runs.
//!
//! # Execution model
//!
//! Runs are strictly sequential and synchronous: each engine invocation
//! blocks until the external process exits, and each sub-run receives an
//! explicit working directory. The engine executable is configuration
//! ([`config::EngineConfig`]), not load-time global state, so tests can
//! substitute a fake engine.
//!
//! # Quick start
//!
//! ```no_run
//! use orcaflow::config::{EngineConfig, JobSettings, OptSettings};
//! use orcaflow::engine::Engine;
//! use orcaflow::geometry::Geometry;
//! use orcaflow::parser::OutputParser;
//! use orcaflow::workflow::GeometryOptimizer;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::from_env()?);
//!     let mut geom = Geometry::from_xyz_file(Path::new("water.xyz"))?;
//!     let settings = JobSettings {
//!         method: "B3LYP".to_string(),
//!         basis: "def2-SVP".to_string(),
//!         ..JobSettings::default()
//!     };
//!
//!     let optimizer =
//!         GeometryOptimizer::new(&engine, OutputParser::default(), OptSettings::default());
//!     let report = optimizer.optimize(Path::new("opt"), &mut geom, &settings)?;
//!     println!("converged after {} runs", report.runs);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`geometry`] - molecular geometry, ghost-atom flags, XYZ exchange
//! - [`config`] - calculation settings, engine location, job files
//! - [`parser`] - engine log parsing (energies, thermochemistry, modes)
//! - [`engine`] - input deck generation and synchronous engine execution
//! - [`workflow`] - the convergence/imaginary-mode retry loop
//! - [`bsse`] - counterpoise decomposition into monomer sub-runs
//! - [`summary`] - JSON serialization of parsed results

pub mod bsse;
pub mod config;
pub mod engine;
pub mod geometry;
pub mod parser;
pub mod summary;
pub mod workflow;

pub use config::{EngineConfig, JobSettings};
pub use geometry::Geometry;
