use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "MedExtract";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local Ollama instance used when no URL is configured.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Environment override for the data directory.
pub const DATA_DIR_ENV: &str = "MEDEXTRACT_DATA_DIR";

/// Get the application data directory.
/// `$MEDEXTRACT_DATA_DIR` when set, else ~/MedExtract/ on all platforms.
/// Falls back to the system temp dir when no home directory can be resolved.
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Job metadata files (one JSON file per job id)
pub fn jobs_dir() -> PathBuf {
    app_data_dir().join("jobs")
}

/// Checkpoint snapshots (one JSON file per job id)
pub fn checkpoints_dir() -> PathBuf {
    app_data_dir().join("checkpoints")
}

/// Local embedding / reranker model files
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medextract_lib=info,medextract=info"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_dir_under_app_data() {
        let jobs = jobs_dir();
        assert!(jobs.starts_with(app_data_dir()));
        assert!(jobs.ends_with("jobs"));
    }

    #[test]
    fn checkpoints_and_models_are_siblings() {
        let checkpoints = checkpoints_dir();
        let models = models_dir();
        assert_eq!(checkpoints.parent(), models.parent());
        assert!(checkpoints.ends_with("checkpoints"));
        assert!(models.ends_with("models"));
    }

    #[test]
    fn app_name_is_medextract() {
        assert_eq!(APP_NAME, "MedExtract");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn default_filter_targets_both_crates() {
        let filter = default_log_filter();
        assert!(filter.contains("medextract_lib"));
        assert!(filter.contains("medextract="));
    }
}
