// THEORY:
// Runner configuration is layered. Highest precedence first:
// 1.  **Flags**: command-line arguments, or the environment variables backing them.
// 2.  **File**: the TOML file named by `--config`.
// 3.  **Defaults**: the library's `ToolkitConfig` defaults.
// A value missing from one layer falls through to the next.

use crate::logging::LogFormat;
use anyhow::{Context, Result, bail};
use clap::Parser;
use landcover_toolkit::core_modules::export::ExportSettings;
use landcover_toolkit::{SelectionInput, ToolkitConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
#[command(
    name = "toolkit-runner",
    version,
    about = "Export land-cover class rasters and area tables for a territory"
)]
pub struct CliArgs {
    #[arg(long, env = "TOOLKIT_CONFIG", value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TOOLKIT_ASSETS_DIR", value_name = "DIR", help = "Directory of JSON asset manifests")]
    pub assets_dir: Option<PathBuf>,

    #[arg(long, env = "TOOLKIT_OUTPUT_DIR", value_name = "DIR", help = "Root directory exports are written under")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, env = "TOOLKIT_WORKERS", value_name = "N", help = "Export workers (default: one per CPU)")]
    pub workers: Option<usize>,

    #[arg(long, env = "TOOLKIT_FOLDER", value_name = "NAME", help = "Export folder name")]
    pub folder: Option<String>,

    #[arg(long, env = "TOOLKIT_LOG_FORMAT", value_enum, help = "Log output format")]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "TOOLKIT_REGION", help = "Region key, e.g. mapbiomas-brazil")]
    pub region: Option<String>,

    #[arg(long, env = "TOOLKIT_COLLECTION", help = "Collection key, e.g. collection-9.0")]
    pub collection: Option<String>,

    #[arg(long, env = "TOOLKIT_TABLE", value_name = "ASSET", help = "Territory table asset id")]
    pub table: Option<String>,

    #[arg(long, env = "TOOLKIT_STATE", help = "State name to narrow the table to")]
    pub state: Option<String>,

    #[arg(long, env = "TOOLKIT_PROPERTY", help = "Property identifying features")]
    pub property: Option<String>,

    #[arg(long, env = "TOOLKIT_FEATURE", help = "Value of the property to export")]
    pub feature: Option<String>,

    #[arg(long, env = "TOOLKIT_DATA_TYPE", help = "Data type, e.g. deforestation_sec_vegetation")]
    pub data_type: Option<String>,

    #[arg(long, env = "TOOLKIT_BUFFER", help = "Buffer choice: None, 1km, ..., 5km")]
    pub buffer: Option<String>,

    #[arg(
        long = "period",
        env = "TOOLKIT_PERIODS",
        value_delimiter = ',',
        help = "Period to export; repeat or separate with commas"
    )]
    pub periods: Vec<String>,

    #[arg(long, help = "List the territory tables of the region and exit")]
    pub list_tables: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    assets_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    workers: Option<usize>,
    log_format: Option<LogFormat>,
    export: Option<ExportSettings>,
    selection: Option<PartialSelection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialSelection {
    region: Option<String>,
    collection: Option<String>,
    table: Option<String>,
    state: Option<String>,
    property: Option<String>,
    feature: Option<String>,
    data_type: Option<String>,
    buffer: Option<String>,
    #[serde(default)]
    periods: Vec<String>,
}

/// Everything the runner needs after merging all layers.
#[derive(Debug)]
pub struct RunnerConfig {
    pub toolkit: ToolkitConfig,
    pub log_format: LogFormat,
    /// Form inputs in the order a user would make them.
    pub inputs: Vec<SelectionInput>,
    pub list_tables: bool,
}

impl RunnerConfig {
    pub fn from_args(cli: CliArgs) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_config_file(path)?,
            None => PartialConfig::default(),
        };
        let defaults = ToolkitConfig::default();

        let mut export = file.export.unwrap_or_default();
        if let Some(folder) = cli.folder {
            export.folder = folder;
        }
        let toolkit = ToolkitConfig {
            assets_dir: cli.assets_dir.or(file.assets_dir).unwrap_or(defaults.assets_dir),
            output_dir: cli.output_dir.or(file.output_dir).unwrap_or(defaults.output_dir),
            workers: cli.workers.or(file.workers),
            export,
        };
        toolkit.validate().context("invalid configuration")?;

        let selection = file.selection.unwrap_or_default();
        let periods = if cli.periods.is_empty() {
            selection.periods
        } else {
            cli.periods
        };

        let mut inputs = Vec::new();
        let steps: [(Option<String>, fn(String) -> SelectionInput); 7] = [
            (cli.region.or(selection.region), SelectionInput::ChooseRegion),
            (cli.collection.or(selection.collection), SelectionInput::ChooseCollection),
            (cli.table.or(selection.table), SelectionInput::ChooseTable),
            (cli.state.or(selection.state), SelectionInput::ChooseState),
            (cli.property.or(selection.property), SelectionInput::ChooseProperty),
            (cli.feature.or(selection.feature), SelectionInput::ChooseFeature),
            (cli.data_type.or(selection.data_type), SelectionInput::ChooseDataType),
        ];
        for (value, input) in steps {
            if let Some(value) = value {
                inputs.push(input(value));
            }
        }
        if let Some(buffer) = cli.buffer.or(selection.buffer) {
            inputs.push(SelectionInput::ChooseBuffer(buffer));
        }
        inputs.extend(periods.into_iter().map(|period| SelectionInput::TogglePeriod {
            period,
            checked: true,
        }));

        Ok(Self {
            toolkit,
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
            inputs,
            list_tables: cli.list_tables,
        })
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    if ext != "toml" {
        bail!("unsupported config extension: {ext} (expected .toml)");
    }
    toml::from_str(&contents).with_context(|| format!("failed to parse TOML config {:?}", path))
}
