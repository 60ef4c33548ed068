//! Run settings shared by the command-line front-end and the slicing session.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bounds::Resolution;
use crate::error::{SliceError, SliceResult};
use crate::Scalar;

/// Default voxel pitch in microns on every axis.
pub const DEFAULT_RESOLUTION_MICRONS: Scalar = 42.0;

/// High level slicer settings. Missing fields in a settings file fall back to
/// the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerSettings {
    /// Voxel pitch per axis (X, Y, Z) in microns.
    pub resolution_microns: [Scalar; 3],
    /// Passed through to backends that can show a preview window.
    pub interactive: bool,
    /// Write one binvox file per material; otherwise models are only loaded
    /// and prepared.
    pub write_binvox: bool,
}

impl Default for SlicerSettings {
    fn default() -> Self {
        Self {
            resolution_microns: [DEFAULT_RESOLUTION_MICRONS; 3],
            interactive: false,
            write_binvox: false,
        }
    }
}

impl SlicerSettings {
    pub fn from_json(json: &str) -> SliceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SliceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SliceError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn resolution(&self) -> SliceResult<Resolution> {
        Resolution::from_microns(self.resolution_microns)
    }
}
