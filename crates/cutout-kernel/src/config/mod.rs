//! Configuration loading.
//!
//! Formats are detected from the file extension (YAML, TOML, JSON, INI, RON,
//! JSON5). `${VAR}` and `$VAR` references are substituted from the
//! environment before parsing, several sources can be layered, and
//! prefixed environment variables can override file values.

mod pipeline;

pub use config::FileFormat;
pub use pipeline::{
    BATCH_CONCURRENCY_RANGE, DEFAULT_API_ENDPOINT, DEFAULT_REMOTE_MODEL, Device,
    MAX_RETRIES_RANGE, PER_ATTEMPT_TIMEOUT_SECS_RANGE, PipelineConfig, RETRY_DELAY_SECS_RANGE,
};

use std::path::Path;
use std::sync::OnceLock;

use config::{Config as Cfg, Environment, File};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::PipelineError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Invalid(#[from] PipelineError),
}

/// Result type for config operations, carrying attached context.
pub type ConfigResult<T> = Result<T, Report<ConfigError>>;

/// Detect configuration format from file extension.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            Report::new(ConfigError::UnsupportedFormat(
                "No file extension found".to_string(),
            ))
        })
        .attach(format!("detecting format of {path}"))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(Report::new(ConfigError::UnsupportedFormat(ext.to_string()))),
    }
}

fn braced_var() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
    })
}

fn bare_var() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("static regex is valid"))
}

/// Substitute `${VAR}` and `$VAR` references; unknown variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = braced_var().replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    bare_var()
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn read_source(path: &str) -> ConfigResult<(String, FileFormat)> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::from)
        .map_err(Report::new)
        .attach(format!("reading {path}"))?;
    Ok((substitute_env_vars(&content), format))
}

fn deserialize<T: DeserializeOwned>(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> ConfigResult<T> {
    let config = builder
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;

    config
        .try_deserialize()
        .map_err(|e| Report::new(ConfigError::Serialization(e.to_string())))
}

/// Load configuration from a file.
pub fn load_config<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    let (content, format) = read_source(path)?;
    deserialize(Cfg::builder().add_source(File::from_str(&content, format)))
        .attach(format!("loading {path}"))
}

/// Load configuration from a string with explicit format.
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    let content = substitute_env_vars(content);
    deserialize(Cfg::builder().add_source(File::from_str(&content, format)))
}

/// Load several files, later files overriding earlier ones.
pub fn load_merged<T: DeserializeOwned>(paths: &[&str]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for path in paths {
        let (content, format) = read_source(path)?;
        builder = builder.add_source(File::from_str(&content, format));
    }
    deserialize(builder).attach(format!("merging {}", paths.join(", ")))
}

/// Load a file, then apply `PREFIX__KEY` environment overrides.
pub fn load_with_env<T: DeserializeOwned>(path: &str, env_prefix: &str) -> ConfigResult<T> {
    let (content, format) = read_source(path)?;
    deserialize(
        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .add_source(Environment::with_prefix(env_prefix).separator("__")),
    )
    .attach(format!("loading {path} with {env_prefix} overrides"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendType;
    use std::io::Write;

    #[test]
    fn detects_formats_by_extension() {
        assert_eq!(detect_format("pipeline.yaml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("pipeline.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("pipeline.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("pipeline.json").unwrap(), FileFormat::Json);
        assert_eq!(detect_format("pipeline.json5").unwrap(), FileFormat::Json5);
        assert!(detect_format("pipeline.txt").is_err());
        assert!(detect_format("pipeline").is_err());
    }

    #[test]
    fn unknown_variables_are_left_alone() {
        let out = substitute_env_vars("token: ${CUTOUT_SURELY_UNSET_VAR_91}");
        assert_eq!(out, "token: ${CUTOUT_SURELY_UNSET_VAR_91}");
    }

    #[test]
    fn known_variables_are_substituted() {
        let path = std::env::var("PATH").unwrap_or_default();
        if path.is_empty() {
            return;
        }
        let out = substitute_env_vars("p: ${PATH}");
        assert_eq!(out, format!("p: {path}"));
    }

    #[test]
    fn pipeline_config_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
default_backend = "remote-api"
fallback_chain = ["remote-api", "u2net"]
max_retries = 1
retry_delay_secs = 0.5
"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.default_backend, BackendType::RemoteApi);
        assert_eq!(
            config.fallback_chain,
            vec![BackendType::RemoteApi, BackendType::Baseline]
        );
        assert_eq!(config.max_retries, 1);
        // untouched fields keep their defaults
        assert_eq!(config.batch_concurrency, 10);
        assert!(config.collect_metrics);
    }

    #[test]
    fn merged_files_override_in_order() {
        let mut base = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(base, r#"{{ "batch_concurrency": 4, "max_retries": 3 }}"#).unwrap();
        let mut local = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(local, "max_retries: 0").unwrap();

        let paths = [
            base.path().to_str().unwrap(),
            local.path().to_str().unwrap(),
        ];
        let config = PipelineConfig::load_merged(&paths).unwrap();
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn out_of_range_file_is_rejected_with_context() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "batch_concurrency = 0").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let report = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(report.current_context(), ConfigError::Invalid(_)));
        assert!(format!("{report:?}").contains(&path));
    }

    #[test]
    fn unknown_backend_name_fails_to_load() {
        let result: ConfigResult<PipelineConfig> =
            from_str(r#"default_backend = "sam-2""#, FileFormat::Toml);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_reports_io_error() {
        let report = load_config::<PipelineConfig>("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(report.current_context(), ConfigError::Io(_)));
    }
}
