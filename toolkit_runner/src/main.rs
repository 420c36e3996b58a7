// THEORY:
// The runner is the headless host of the export form. It turns flags and a
// config file into the same inputs a user would click through, replays them
// through the selection state machine, carries out the effects that make sense
// without a map (logging menus, running table discovery), and finally hands the
// ready selection to the export pipeline. Map layers are computed but only
// summarised in the log, with their colour and legend counts.

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use config::{CliArgs, RunnerConfig};
use landcover_toolkit::core_modules::catalog::toolkit_title;
use landcover_toolkit::core_modules::discovery::discover_tables;
use landcover_toolkit::core_modules::selection::Dataset;
use landcover_toolkit::{AssetStore, DataProduct, Effect, ExportPipeline, FileSystemSink, Selection, catalog};
use std::iter;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RunnerConfig::from_args(CliArgs::parse())?;
    logging::init(config.log_format)?;
    info!(title = %toolkit_title(), "starting");

    let store = Arc::new(
        AssetStore::load_dir(&config.toolkit.assets_dir)
            .with_context(|| format!("failed to load assets from {:?}", config.toolkit.assets_dir))?,
    );

    let sink = Arc::new(FileSystemSink::new(&config.toolkit.output_dir));
    let pipeline = ExportPipeline::new(store.clone(), store.clone(), sink, &config.toolkit)?;

    // --- 1. Replay the form ---
    let mut selection = Selection::new();
    for input in config.inputs.iter().cloned() {
        let effects = selection
            .apply(input.clone())
            .with_context(|| format!("selection rejected {input:?}"))?;
        for effect in &effects {
            carry_out(effect, &selection, &store, &pipeline)?;
        }
    }

    if config.list_tables {
        let region = selection
            .stage()
            .region()
            .context("--list-tables needs --region")?;
        for table in discover_tables(catalog().region(region)?, store.as_ref()) {
            println!("{table}");
        }
        pipeline.shutdown().await;
        return Ok(());
    }

    // --- 2. Export ---
    let report = pipeline.export(&selection).await;
    pipeline.shutdown().await;
    let report = report.context("export failed")?;

    for receipt in report.images.iter().chain(iter::once(&report.table)) {
        for path in &receipt.paths {
            info!(name = %receipt.name, path = %path.display(), "written");
        }
    }
    Ok(())
}

/// Headless handling of one form effect. Effects that only move things around
/// on a map are traced and skipped.
fn carry_out(effect: &Effect, selection: &Selection, store: &AssetStore, pipeline: &ExportPipeline) -> Result<()> {
    match effect {
        Effect::PopulateCollections(versions) => {
            let names: Vec<&str> = versions.iter().map(|v| v.as_str()).collect();
            info!(collections = ?names, "collections available");
        }
        Effect::DiscoverTables(region) => {
            let tables = discover_tables(catalog().region(*region)?, store);
            info!(region = %region, tables = tables.len(), "territory tables discovered");
        }
        Effect::PopulateDataTypes(products) => {
            let names: Vec<&str> = products.iter().map(|p| p.as_str()).collect();
            info!(data_types = ?names, "data types available");
        }
        Effect::RebuildLayerList { label, periods } => {
            info!(layer = %label, first = ?periods.first(), last = ?periods.last(), "periods available");
        }
        Effect::ShowPreview { dataset, period } => {
            show_layer(pipeline, *dataset, DataProduct::DeforestationSecondaryVegetation, period);
        }
        Effect::AddImageLayer { label, period } => {
            if let (Some(dataset), Some(data_type)) = (selection.stage().dataset(), selection.stage().data_type()) {
                debug!(layer = %label, "adding image layer");
                show_layer(pipeline, dataset, data_type, period);
            }
        }
        Effect::SetExportEnabled(enabled) => info!(enabled, "export availability changed"),
        other => debug!(effect = ?other, "effect skipped"),
    }
    Ok(())
}

/// Layers are cosmetic, so a failure is logged and the run goes on.
fn show_layer(pipeline: &ExportPipeline, dataset: Dataset, data_type: DataProduct, period: &str) {
    match pipeline.layer(dataset, data_type, period) {
        Ok(layer) => {
            info!(
                data_type = %data_type,
                period,
                pixels = layer.raster.valid_count(),
                min = layer.style.range.min,
                max = layer.style.range.max,
                colors = ?layer.color_counts(),
                "layer ready"
            );
            for (label, pixels) in layer.legend_counts() {
                debug!(data_type = %data_type, period, label, pixels, "legend");
            }
        }
        Err(error) => warn!(data_type = %data_type, period, %error, "layer unavailable"),
    }
}
