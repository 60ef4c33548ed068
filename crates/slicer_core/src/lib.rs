//! Core slicing domain logic that remains independent of GPU backends and the CLI shell.
//!
//! This crate hosts:
//! - geometry planning (slice counts, raster sizes) and per-axis camera frames
//! - the sweep orchestrator and the session binding a model to a backend
//! - voxel accumulation and binvox persistence
//! - model descriptors, run settings and the shared error type

pub mod backend;
pub mod binvox;
pub mod bounds;
pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod session;

/// Convenience re-export for the scalar type used across the slicer.
pub type Scalar = f32;

pub use backend::{BackendFactory, BackendKind, RenderingBackend};
pub use binvox::{slice_to_binvox, BinvoxAccumulator, VolumeSlicer, VoxelSet};
pub use bounds::{Axis, BoundingBox, Order, Resolution};
pub use config::SlicerSettings;
pub use error::{SliceError, SliceResult};
pub use frame::{axis_frame, AxisFrame, QuadVertex};
pub use model::{Material, MaterialLayout, ModelDescriptor, ShadingLanguage};
pub use orchestrator::{SliceConsumer, SliceDescriptor, SliceOrchestrator, SweepPlan};
pub use planner::{RasterSize, SliceGeometryPlanner};
pub use session::SlicingSession;
