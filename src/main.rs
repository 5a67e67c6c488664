use std::{fs, path::Path};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use pneumo_triage::{
    config::Cli, report, Diagnosis, ImageIngestor, ModelHandle, Pipeline, Settings,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pneumo_triage=info")),
        )
        .init();

    let cli = Cli::parse();
    ensure!(cli.input.exists(), "Input path does not exist");

    let settings = cli.settings()?;
    if cli.save_csv {
        ensure!(
            settings.csv_path.is_some(),
            "--save-csv requires `csv_path` in the config file"
        );
    }
    let pipeline = Pipeline::from_settings(&settings)?;

    fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            cli.output_dir.display()
        )
    })?;

    if cli.input.is_dir() {
        run_directory(&pipeline, &cli, &settings)
    } else {
        let diagnosis = run_single(&pipeline, &cli.input, &cli, &settings)?;
        println!(
            "{}: {} ({}%)",
            diagnosis.patient_id,
            diagnosis.result.label,
            diagnosis.result.confidence_display()
        );
        Ok(())
    }
}

fn run_directory(pipeline: &Pipeline<ModelHandle>, cli: &Cli, settings: &Settings) -> Result<()> {
    let image_paths = WalkDir::new(&cli.input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && ImageIngestor::is_supported(e.path()))
        .map(|e| e.into_path())
        .collect::<Vec<_>>();

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let mut failures = 0usize;
    for path in &image_paths {
        match run_single(pipeline, path, cli, settings) {
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), error = %format!("{e:#}"), "triage failed");
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish();

    info!(
        processed = image_paths.len() - failures,
        failures, "directory triage complete"
    );
    ensure!(failures == 0, "{failures} image(s) could not be processed");
    Ok(())
}

fn run_single(
    pipeline: &Pipeline<ModelHandle>,
    path: &Path,
    cli: &Cli,
    settings: &Settings,
) -> Result<Diagnosis> {
    let diagnosis = pipeline
        .run(path, &cli.patient_id)
        .with_context(|| format!("Failed to process image: {}", path.display()))?;

    if let Some(overlay) = &diagnosis.overlay {
        let output_path = report::overlay_path(&cli.input, path, &cli.output_dir);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
        overlay
            .save(&output_path)
            .with_context(|| format!("Failed to save heatmap: {}", output_path.display()))?;
    }

    if cli.save_csv {
        if let Some(csv_path) = &settings.csv_path {
            report::append_record(csv_path, &diagnosis.record())?;
        }
    }
    Ok(diagnosis)
}
