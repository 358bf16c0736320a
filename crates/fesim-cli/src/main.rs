use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use nalgebra::Vector3;

use fesim_io::{load_scenario, load_tet_mesh, save_snapshot};
use fesim_model::{Scenario, ScenarioSummary};
use fesim_solver::{FemSimulator, Material, NewmarkConfig, SolverConfig, TetMesh};

fn usage() {
    eprintln!("usage: fesim-cli summarize <scenario.json>");
    eprintln!("       fesim-cli run <scenario.json>");
}

fn print_summary(summary: &ScenarioSummary) {
    println!("name: {}", summary.name);
    println!("platform: {:?}", summary.platform);
    println!("time_step: {}", summary.time_step);
    println!("frames: {}", summary.frames);
    println!("num_models: {}", summary.num_models);
    println!("total_fixed_nodes: {}", summary.total_fixed_nodes);
    println!("writes_snapshots: {}", summary.writes_snapshots);
}

fn load_validated_scenario(path: &str) -> Result<Scenario, String> {
    let scenario = load_scenario(path).map_err(|e| e.to_string())?;
    scenario.validate().map_err(|errors| errors.join("; "))?;
    Ok(scenario)
}

/// Build one simulator per model, meshes resolved relative to the scenario file.
fn build_simulators(scenario: &Scenario, base_dir: &Path) -> Result<Vec<FemSimulator>, String> {
    let config_template = SolverConfig {
        time_step: scenario.time_step,
        newmark: NewmarkConfig::average_acceleration(),
        platform: scenario.platform,
        gravity: Vector3::new(scenario.gravity[0], scenario.gravity[1], scenario.gravity[2]),
        ..SolverConfig::default()
    };

    let mut simulators = Vec::with_capacity(scenario.models.len());
    for model in &scenario.models {
        let stem = base_dir.join(&model.mesh);
        let arrays = load_tet_mesh(&stem)
            .map_err(|e| format!("mesh '{}': {e}", model.mesh))?;
        let material = Material::from_spec(&model.material)?;
        let mesh = TetMesh::new(arrays.positions, arrays.tets, material)?;

        let mut sim = FemSimulator::new(mesh, config_template.clone())?;
        sim.fix_nodes(model.fixed_nodes.iter().copied())?;
        sim.initialize()?;
        simulators.push(sim);
    }
    Ok(simulators)
}

fn snapshot_path(dir: &Path, scenario_name: &str, model_index: usize, frame: usize) -> PathBuf {
    dir.join(format!("{scenario_name}_m{model_index}_f{frame:05}.snap"))
}

fn run_scenario(scenario: &Scenario, base_dir: &Path) -> Result<(), String> {
    let mut simulators = build_simulators(scenario, base_dir)?;
    let snapshot_dir = scenario.snapshot_dir.as_ref().map(|d| base_dir.join(d));

    println!(
        "[{}] starting '{}': {} model(s), {} frame(s), h = {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        scenario.name,
        simulators.len(),
        scenario.frames,
        scenario.time_step
    );
    let start = Instant::now();

    for frame in 0..scenario.frames {
        for (m, sim) in simulators.iter_mut().enumerate() {
            let report = sim
                .run_frame(frame)
                .map_err(|e| format!("model {m}, frame {frame}: {e}"))?;
            let status = if report.converged { "converged" } else { "capped" };
            print!(
                "frame {frame:5} model {m}: {status} in {} iteration(s), residual {:.3e}",
                report.iterations, report.residual_norm
            );
            if report.line_search_floored > 0 {
                print!(", {} floored line search(es)", report.line_search_floored);
            }
            println!();

            if let Some(dir) = &snapshot_dir {
                let path = snapshot_path(dir, &scenario.name, m, frame);
                save_snapshot(&path, &sim.snapshot(frame)).map_err(|e| e.to_string())?;
            }
        }
    }

    println!(
        "[{}] finished '{}' in {:.3} s",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        scenario.name,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        usage();
        return ExitCode::from(2);
    }

    let path = &args[2];
    let base_dir = Path::new(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    match args[1].as_str() {
        "summarize" => match load_validated_scenario(path) {
            Ok(scenario) => {
                print_summary(&scenario.summary());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("scenario error: {err}");
                ExitCode::from(1)
            }
        },
        "run" => match load_validated_scenario(path) {
            Ok(scenario) => match run_scenario(&scenario, &base_dir) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("simulation error: {err}");
                    ExitCode::from(1)
                }
            },
            Err(err) => {
                eprintln!("scenario error: {err}");
                ExitCode::from(1)
            }
        },
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
