//! Command-line shell slicing material-field models into per-material binvox volumes.
//!
//! Without `--binvox` every model is only loaded and prepared, which checks
//! that its shader compiles.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser;
use slicer_core::{slice_to_binvox, Axis, ModelDescriptor, SlicerSettings, SlicingSession};
use tracer::init_tracing;
use tracing::{info, warn};

const MODEL_EXTENSION: &str = "json";

#[derive(Debug, Parser)]
#[command(name = "irmf-slicer", version, about)]
struct Cli {
    /// Resolution in microns on every axis.
    #[arg(long, value_name = "MICRONS")]
    res: Option<f32>,

    /// X resolution in microns; overrides --res.
    #[arg(long, value_name = "MICRONS")]
    res_x: Option<f32>,

    /// Y resolution in microns; overrides --res.
    #[arg(long, value_name = "MICRONS")]
    res_y: Option<f32>,

    /// Z resolution in microns; overrides --res.
    #[arg(long, value_name = "MICRONS")]
    res_z: Option<f32>,

    /// Request a preview window while slicing.
    #[arg(long)]
    view: bool,

    /// Write one binvox file per material next to each model.
    #[arg(long)]
    binvox: bool,

    /// JSON settings file; command-line flags take precedence.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Model descriptor files produced by the model loader.
    #[arg(value_name = "MODEL")]
    models: Vec<PathBuf>,
}

impl Cli {
    fn resolve_settings(&self) -> Result<SlicerSettings> {
        let mut settings = match &self.settings {
            Some(path) => SlicerSettings::load(path)
                .with_context(|| format!("failed to load settings {}", path.display()))?,
            None => SlicerSettings::default(),
        };

        if let Some(res) = self.res {
            settings.resolution_microns = [res; 3];
        }
        for (axis, value) in [self.res_x, self.res_y, self.res_z].into_iter().enumerate() {
            if let Some(value) = value {
                settings.resolution_microns[axis] = value;
            }
        }
        settings.interactive |= self.view;
        settings.write_binvox |= self.binvox;
        Ok(settings)
    }
}

/// `dir/name.json` slices to `dir/name-matNN-<material>.binvox`.
fn output_base(model_path: &Path) -> PathBuf {
    let stem = model_path.file_stem().unwrap_or(model_path.as_os_str());
    model_path.with_file_name(stem)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;
    let resolution = settings
        .resolution()
        .context("invalid slicing resolution")?;

    if !settings.write_binvox {
        info!("--binvox not supplied; testing model shader compilation only");
    }

    let mut session =
        SlicingSession::new(resolution, settings.interactive, slicer_gfx::create_backend);

    for path in &cli.models {
        if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION) {
            warn!(path = %path.display(), "skipping non-model file");
            continue;
        }

        info!(path = %path.display(), "processing model");
        let model = ModelDescriptor::load(path)
            .with_context(|| format!("failed to read model {}", path.display()))?;
        session
            .load_model(model)
            .with_context(|| format!("{}", path.display()))?;

        if settings.write_binvox {
            info!(
                materials = session.num_materials(),
                "slicing materials into separate binvox files"
            );
            let written = slice_to_binvox(output_base(path), &mut session)
                .with_context(|| format!("failed to slice {}", path.display()))?;
            info!(files = written.len(), "binvox output complete");
        } else {
            session
                .prepare_render(Axis::Z)
                .with_context(|| format!("{}: shader check failed", path.display()))?;
        }
    }

    session.close();
    info!("done");
    Ok(())
}

mod tracer {
    use tracing_subscriber::EnvFilter;

    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_axis_flags_override_uniform_resolution() {
        let cli =
            Cli::try_parse_from(["irmf-slicer", "--res", "100", "--res-z", "25", "a.json"]).unwrap();
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.resolution_microns, [100.0, 100.0, 25.0]);
        assert!(!settings.write_binvox);
        assert_eq!(cli.models, vec![PathBuf::from("a.json")]);
    }

    #[test]
    fn defaults_apply_without_flags() {
        let cli = Cli::try_parse_from(["irmf-slicer", "--binvox", "--view"]).unwrap();
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.resolution_microns, [42.0; 3]);
        assert!(settings.write_binvox);
        assert!(settings.interactive);
    }

    #[test]
    fn output_base_drops_extension() {
        assert_eq!(
            output_base(Path::new("models/rod.json")),
            PathBuf::from("models/rod")
        );
    }
}
