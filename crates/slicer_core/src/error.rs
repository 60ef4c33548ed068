//! Error types shared by every stage of the slicing pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendKind;
use crate::bounds::Axis;
use crate::Scalar;

/// Boxed error produced by a rendering backend or slice consumer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while configuring, rendering or persisting a slice stack.
#[derive(Debug, Error)]
pub enum SliceError {
    /// The bounding box did not carry exactly three components per corner.
    #[error("malformed bounding box: expected 3 components, got min={min} max={max}")]
    MalformedBoundingBox { min: usize, max: usize },

    /// An axis of the bounding box is empty, inverted or not finite.
    #[error("invalid bounding box on {axis} axis: min={min}, max={max}")]
    InvalidBoundingBox {
        axis: Axis,
        min: Scalar,
        max: Scalar,
    },

    /// A voxel pitch was zero, negative or not finite.
    #[error("invalid resolution on {axis} axis: {delta} (must be > 0)")]
    InvalidResolution { axis: Axis, delta: Scalar },

    #[error("model declares no materials")]
    NoMaterials,

    /// Only the 4/9/16 channel layouts exist.
    #[error("unsupported material count {0}: at most 16 materials are supported")]
    UnsupportedMaterialCount(usize),

    #[error("material {ordinal} is out of range 1..={count}")]
    MaterialOutOfRange { ordinal: usize, count: usize },

    #[error("no model loaded")]
    NoModel,

    #[error("rendering backend not initialized")]
    BackendNotInitialized,

    #[error("no frame prepared for the {axis} axis")]
    FrameNotPrepared { axis: Axis },

    #[error("failed to create {kind} backend")]
    BackendCreate {
        kind: BackendKind,
        #[source]
        source: BoxError,
    },

    #[error("failed to prepare {axis} frame")]
    Prepare {
        axis: Axis,
        #[source]
        source: BoxError,
    },

    #[error("render failed on {axis} slice {index} (depth {depth}) for material {material}")]
    Render {
        axis: Axis,
        material: usize,
        index: usize,
        depth: Scalar,
        #[source]
        source: BoxError,
    },

    #[error("slice consumer failed on {axis} slice {index} (depth {depth}) for material {material}")]
    Consumer {
        axis: Axis,
        material: usize,
        index: usize,
        depth: Scalar,
        #[source]
        source: BoxError,
    },

    /// Every slice of one material must share the raster dimensions of the first.
    #[error("raster size {found:?} does not match earlier slices {expected:?}")]
    RasterSizeMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("invalid JSON document")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed binvox data: {0}")]
    Binvox(String),
}

/// Result type for slicing operations.
pub type SliceResult<T> = std::result::Result<T, SliceError>;

impl SliceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
