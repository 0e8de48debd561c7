#![cfg(unix)]

use orcaflow::config::{EngineConfig, JobSettings, OptSettings};
use orcaflow::engine::{Engine, EngineError, GEOMETRY_FILE, OUTPUT_FILE};
use orcaflow::geometry::Geometry;
use orcaflow::parser::OutputParser;
use orcaflow::workflow::{GeometryOptimizer, WorkflowError, RUN_LOG_FILE};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const CLEAN_LOG: &str = "\
                    ***        THE OPTIMIZATION HAS CONVERGED        ***

Total Energy       :         -152.12345678 Eh

-----------------------
VIBRATIONAL FREQUENCIES
-----------------------

Scaling factor for frequencies =  1.000000000

   0:         0.00 cm**-1
   1:         0.00 cm**-1
   2:         0.00 cm**-1
   3:        11.24 cm**-1
   4:        85.03 cm**-1
   5:      1630.23 cm**-1

------------
NORMAL MODES
------------

These modes are the cartesian displacements weighted by the diagonal matrix
M(i,j) = 1/sqrt(m[i]) with m[i] = mass of atom i
Thus, these vectors are normalized but *not* orthogonal

                  0          1          2          3          4          5
      0       0.100000   0.000000   0.000000   0.000000   0.000000   0.000000
      1       0.000000   0.200000   0.000000   0.000000   0.000000   0.000000
      2       0.000000   0.000000   0.300000   0.000000   0.000000   0.000000
      3       0.000000   0.000000   0.000000   0.400000   0.000000   0.000000
      4       0.000000   0.000000   0.000000   0.000000   0.500000   0.000000
      5       0.000000   0.000000   0.000000   0.000000   0.000000   0.600000
";

const IMAGINARY_LOG: &str = "\
                    ***        THE OPTIMIZATION HAS CONVERGED        ***

Total Energy       :         -152.09000000 Eh

-----------------------
VIBRATIONAL FREQUENCIES
-----------------------

Scaling factor for frequencies =  1.000000000

   0:       -45.60 cm**-1 ***imaginary mode***
   1:         0.00 cm**-1
   2:         0.00 cm**-1
   3:        11.24 cm**-1
   4:        85.03 cm**-1
   5:      1630.23 cm**-1

------------
NORMAL MODES
------------

These modes are the cartesian displacements weighted by the diagonal matrix
M(i,j) = 1/sqrt(m[i]) with m[i] = mass of atom i
Thus, these vectors are normalized but *not* orthogonal

                  0          1          2          3          4          5
      0       0.100000   0.000000   0.000000   0.000000   0.000000   0.000000
      1       0.000000   0.200000   0.000000   0.000000   0.000000   0.000000
      2       0.000000   0.000000   0.300000   0.000000   0.000000   0.000000
      3       0.000000   0.000000   0.000000   0.400000   0.000000   0.000000
      4       0.000000   0.000000   0.000000   0.000000   0.500000   0.000000
      5       0.000000   0.000000   0.000000   0.000000   0.000000   0.600000
";

const H2_XYZ: &str = "2\n\nH  0.00000000  0.00000000  0.00000000\nH  0.00000000  0.00000000  0.74000000\n";

/// Install a fake engine that replays canned logs, one per invocation.
///
/// The script counts its invocations in the state directory and prints the
/// n-th canned log to stdout (which the runner captures into the run's
/// output file), then drops a fixed optimized geometry next to it.
fn fake_engine(state: &Path, logs: &[&str]) -> EngineConfig {
    for (i, log) in logs.iter().enumerate() {
        fs::write(state.join(format!("log{i}")), log).unwrap();
    }
    fs::write(state.join("geom.xyz"), H2_XYZ).unwrap();

    let script = state.join("fake_orca");
    let body = format!(
        "#!/bin/sh\n\
         state=\"{state}\"\n\
         n=0\n\
         [ -f \"$state/count\" ] && n=$(cat \"$state/count\")\n\
         last={last}\n\
         [ \"$n\" -gt \"$last\" ] && n=$last\n\
         cat \"$state/log$n\"\n\
         cp \"$state/geom.xyz\" ORCA_run.xyz\n\
         echo $((n+1)) > \"$state/count\"\n",
        state = state.display(),
        last = logs.len() - 1,
    );
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    EngineConfig::new(&script)
}

fn setup() -> (TempDir, Geometry, JobSettings) {
    let dir = tempfile::tempdir().unwrap();
    let geom_path = dir.path().join("start.xyz");
    fs::write(&geom_path, H2_XYZ).unwrap();
    let geom = Geometry::from_xyz_file(&geom_path).unwrap();
    let settings = JobSettings {
        method: "B3LYP".to_string(),
        basis: "def2-SVP".to_string(),
        ..JobSettings::default()
    };
    (dir, geom, settings)
}

#[test]
fn test_clean_run_terminates_after_one_engine_call() {
    let (dir, mut geom, settings) = setup();
    let engine = Engine::new(fake_engine(dir.path(), &[CLEAN_LOG]));
    let base = dir.path().join("opt");

    let optimizer =
        GeometryOptimizer::new(&engine, OutputParser::default(), OptSettings::default());
    let report = optimizer.optimize(&base, &mut geom, &settings).unwrap();

    assert_eq!(report.runs, 1);
    assert_eq!(report.perturbations, 0);
    assert!((report.summary.scf_energy - (-152.12345678)).abs() < 1e-10);

    // Canonical outputs copied/written to the base directory.
    assert!(base.join(OUTPUT_FILE).exists());
    assert!(base.join(GEOMETRY_FILE).exists());
    assert!(base.join("ORCA_summary.json").exists());

    let run_log = fs::read_to_string(base.join(RUN_LOG_FILE)).unwrap();
    assert!(run_log.contains("run0: starting run"));
    assert!(run_log.contains("optimization complete after 1 runs"));
    assert!(!run_log.contains("correcting imaginary mode"));
}

#[test]
fn test_imaginary_mode_is_perturbed_and_rerun() {
    let (dir, mut geom, settings) = setup();
    let engine = Engine::new(fake_engine(dir.path(), &[IMAGINARY_LOG, CLEAN_LOG]));
    let base = dir.path().join("opt");

    let optimizer =
        GeometryOptimizer::new(&engine, OutputParser::default(), OptSettings::default());
    let report = optimizer.optimize(&base, &mut geom, &settings).unwrap();

    assert_eq!(report.runs, 2);
    assert_eq!(report.perturbations, 1);
    assert!(base.join("run0").exists());
    assert!(base.join("run1").exists());

    let run_log = fs::read_to_string(base.join(RUN_LOG_FILE)).unwrap();
    assert!(run_log.contains("run1: correcting imaginary mode 0"));

    // run1 started from the perturbed geometry: mode 0 displaces the first
    // x coordinate by 0.1, scaled by the default 0.5.
    let deck = fs::read_to_string(base.join("run1").join("ORCA_run.inp")).unwrap();
    assert!(deck.contains("H  0.05000000  0.00000000  0.00000000"));
}

#[test]
fn test_unconverged_runs_hit_the_retry_cap() {
    let (dir, mut geom, settings) = setup();
    let engine = Engine::new(fake_engine(dir.path(), &["SCF not converged\n"]));
    let base = dir.path().join("opt");

    let opts = OptSettings {
        max_runs: 3,
        ..OptSettings::default()
    };
    let optimizer = GeometryOptimizer::new(&engine, OutputParser::default(), opts);
    let err = optimizer.optimize(&base, &mut geom, &settings).unwrap_err();

    assert!(matches!(err, WorkflowError::Stalled { runs: 3 }));
    let run_log = fs::read_to_string(base.join(RUN_LOG_FILE)).unwrap();
    assert!(run_log.contains("run1: attempting to reach convergence"));
    assert!(run_log.contains("giving up after 3 runs"));
}

#[test]
fn test_engine_failure_is_fatal() {
    let (dir, mut geom, settings) = setup();
    let engine = Engine::new(EngineConfig::new("/bin/false"));
    let base = dir.path().join("opt");

    let optimizer =
        GeometryOptimizer::new(&engine, OutputParser::default(), OptSettings::default());
    let err = optimizer.optimize(&base, &mut geom, &settings).unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Engine(EngineError::Failed { .. })
    ));
}
