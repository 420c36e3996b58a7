// THEORY:
// `ToolkitConfig` gathers the knobs of an export run. Every field has a default,
// so an empty configuration file (or none at all) yields the values the hosted
// toolkit always used: 30 m pixels, square kilometers, the `MAPBIOMAS-EXPORT`
// folder and one export worker per CPU. The binary layers file values and
// command-line flags on top; the library only validates the result.

use crate::core_modules::export::ExportSettings;
use crate::error::{Result, ToolkitError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Directory of JSON asset manifests.
    pub assets_dir: PathBuf,
    /// Root the export folder is created under.
    pub output_dir: PathBuf,
    /// Export workers; `None` means one per logical CPU.
    pub workers: Option<usize>,
    pub export: ExportSettings,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            output_dir: PathBuf::from("exports"),
            workers: None,
            export: ExportSettings::default(),
        }
    }
}

impl ToolkitConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let export = &self.export;
        if !(export.scale.is_finite() && export.scale > 0.0) {
            return Err(ToolkitError::InvalidParameter(format!(
                "export.scale must be positive, got {}",
                export.scale
            )));
        }
        if !(export.unit.divisor.is_finite() && export.unit.divisor > 0.0) {
            return Err(ToolkitError::InvalidParameter(format!(
                "export.unit.divisor must be positive, got {}",
                export.unit.divisor
            )));
        }
        if !(export.max_pixels >= 1.0) {
            return Err(ToolkitError::InvalidParameter(format!(
                "export.max_pixels must be at least 1, got {}",
                export.max_pixels
            )));
        }
        if export.folder.trim().is_empty() {
            return Err(ToolkitError::InvalidParameter("export.folder must not be empty".into()));
        }
        if self.workers == Some(0) {
            return Err(ToolkitError::InvalidParameter("workers must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::zonal::AreaUnit;

    #[test]
    fn defaults_match_the_hosted_toolkit() {
        let config = ToolkitConfig::default();
        assert_eq!(config.export.folder, "MAPBIOMAS-EXPORT");
        assert_eq!(config.export.scale, 30.0);
        assert_eq!(config.export.max_pixels, 1e13);
        assert_eq!(config.export.unit, AreaUnit::square_kilometers());
        assert!(config.worker_count() >= 1);
        config.validate().expect("valid");
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: ToolkitConfig =
            serde_json::from_str(r#"{"workers": 2, "export": {"unit": {"divisor": 10000.0, "label": "hectares"}}}"#)
                .expect("parse");
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.export.unit, AreaUnit::hectares());
        assert_eq!(config.export.scale, 30.0);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = ToolkitConfig::default();
        config.export.scale = -30.0;
        assert!(config.validate().is_err());

        let mut config = ToolkitConfig::default();
        config.workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = ToolkitConfig::default();
        config.export.unit.divisor = 0.0;
        assert!(config.validate().is_err());
    }
}
