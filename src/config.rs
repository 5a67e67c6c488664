use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::errors::{Result, TriageError};

/// Convolutional layer the bundled model exposes for Grad-CAM.
pub const DEFAULT_LAYER_NAME: &str = "conv10_thisone";

/// Key-value settings read from `config.json`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default)]
    pub csv_path: Option<PathBuf>,

    #[serde(default)]
    pub layer_name: Option<String>,

    #[serde(default)]
    pub device_id: Option<i32>,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| TriageError::ConfigInvalid {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            TriageError::ConfigInvalid { message } => TriageError::ConfigInvalid {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| TriageError::ConfigInvalid {
            message: e.to_string(),
        })
    }

    /// The configured weight file. Its absence is fatal at startup.
    pub fn require_model_path(&self) -> Result<&Path> {
        match self.model_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(TriageError::ConfigInvalid {
                message: "`model_path` is not configured".to_string(),
            }),
        }
    }

    pub fn layer_name(&self) -> &str {
        self.layer_name.as_deref().unwrap_or(DEFAULT_LAYER_NAME)
    }

    pub fn device_id(&self) -> i32 {
        self.device_id.unwrap_or(0)
    }
}

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Image file (.dcm, .jpg, .jpeg, .png) or a directory of them
    pub input: PathBuf,

    #[arg(short, long)]
    pub patient_id: String,

    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides `model_path` from the config file
    #[arg(short, long)]
    pub model_path: Option<PathBuf>,

    /// Overrides `layer_name` from the config file
    #[arg(short, long)]
    pub layer: Option<String>,

    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Append each result to `csv_path`
    #[arg(long, default_value_t = false)]
    pub save_csv: bool,

    #[arg(short, long)]
    pub device_id: Option<i32>,
}

impl Cli {
    /// Settings from the config file with command-line overrides applied.
    /// A missing config file is tolerated when the model path is given on
    /// the command line.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = if self.config.exists() {
            Settings::from_file(&self.config)?
        } else if self.model_path.is_some() {
            Settings::default()
        } else {
            return Err(TriageError::ConfigInvalid {
                message: format!("config file {} does not exist", self.config.display()),
            });
        };

        if let Some(model_path) = &self.model_path {
            settings.model_path = Some(model_path.clone());
        }
        if let Some(layer) = &self.layer {
            settings.layer_name = Some(layer.clone());
        }
        if let Some(device_id) = self.device_id {
            settings.device_id = Some(device_id);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_json() -> Result<()> {
        let settings = Settings::from_json(
            r#"{"model_path": "models/conv_MLP_84.onnx", "csv_path": "results/historial.csv"}"#,
        )?;
        assert_eq!(
            settings.require_model_path()?,
            Path::new("models/conv_MLP_84.onnx")
        );
        assert_eq!(settings.csv_path, Some(PathBuf::from("results/historial.csv")));
        assert_eq!(settings.layer_name(), DEFAULT_LAYER_NAME);
        assert_eq!(settings.device_id(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_model_path_is_config_invalid() -> Result<()> {
        let settings = Settings::from_json(r#"{"csv_path": "out.csv"}"#)?;
        assert!(matches!(
            settings.require_model_path(),
            Err(TriageError::ConfigInvalid { .. })
        ));

        let empty = Settings::from_json(r#"{"model_path": ""}"#)?;
        assert!(matches!(
            empty.require_model_path(),
            Err(TriageError::ConfigInvalid { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_malformed_json_is_config_invalid() {
        assert!(matches!(
            Settings::from_json("{ model_path: "),
            Err(TriageError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_cli_overrides() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{"model_path": "a.onnx", "layer_name": "conv5", "device_id": 1}"#,
        )?;

        let cli = Cli::parse_from([
            "pneumo-triage",
            "scan.dcm",
            "--patient-id",
            "123",
            "--config",
            config_path.to_str().unwrap(),
            "--layer",
            "conv10_thisone",
        ]);
        let settings = cli.settings()?;
        assert_eq!(settings.require_model_path()?, Path::new("a.onnx"));
        assert_eq!(settings.layer_name(), "conv10_thisone");
        assert_eq!(settings.device_id(), 1);
        Ok(())
    }

    #[test]
    fn test_cli_without_config_requires_model_path() {
        let cli = Cli::parse_from([
            "pneumo-triage",
            "scan.png",
            "-p",
            "1",
            "--config",
            "/nonexistent/config.json",
        ]);
        assert!(matches!(
            cli.settings(),
            Err(TriageError::ConfigInvalid { .. })
        ));
    }
}
