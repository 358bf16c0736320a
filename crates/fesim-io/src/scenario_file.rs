//! Scenario file loading.
//!
//! Scenarios are JSON documents deserialized into [`fesim_model::Scenario`].
//! Validation stays in the model crate; this module only does the file and
//! JSON handling.

use std::fs;
use std::path::Path;

use fesim_model::Scenario;

use crate::error::{IoError, Result};

/// Load and deserialize a scenario file.
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|_| IoError::FileNotFound(path.display().to_string()))?;
    let scenario: Scenario = serde_json::from_str(&text)?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fesim_model::{ExecutionPlatform, MaterialVariant};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SCENARIO_JSON: &str = r#"{
        "name": "hanging_bar",
        "platform": "OPENMP",
        "time_step": 0.01,
        "frames": 50,
        "models": [{
            "mesh": "meshes/bar",
            "material": {
                "variant": "stable",
                "youngs_modulus": 5.0e5,
                "poissons_ratio": 0.4,
                "density": 1000.0
            },
            "fixed_nodes": [0, 1, 2, 3]
        }]
    }"#;

    #[test]
    fn loads_and_validates_scenario() {
        let path = unique_temp_file("fesim_scenario_load", "scene.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, SCENARIO_JSON).unwrap();

        let scenario = load_scenario(&path).expect("load should succeed");
        assert_eq!(scenario.platform, ExecutionPlatform::OpenMp);
        assert_eq!(scenario.models[0].material.variant, MaterialVariant::Stable);
        assert_eq!(scenario.gravity, [0.0, -9.81, 0.0]); // default
        scenario.validate().expect("scenario should validate");
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let path = unique_temp_file("fesim_scenario_bad", "scene.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let err = load_scenario(&path).expect_err("bad JSON should fail");
        assert!(matches!(err, IoError::Json(_)));
    }

    fn unique_temp_file(prefix: &str, filename: &str) -> PathBuf {
        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be valid")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("{prefix}_{pid}_{nanos}"))
            .join(filename)
    }
}
