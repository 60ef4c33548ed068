//! Rendering backend capability consumed by the orchestrator.
//!
//! A backend rasterizes one cross-section of a model's material field per call.
//! Concrete GPU implementations live in `slicer_gfx`; this crate only depends on
//! the trait so the whole pipeline can be exercised with in-memory backends.

use std::fmt;

use image::RgbaImage;

use crate::frame::AxisFrame;
use crate::model::{ModelDescriptor, ShadingLanguage};

/// Which family of backend a model needs, keyed by its shading language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Consumes GLSL material functions.
    OpenGl,
    /// Consumes WGSL material functions.
    WebGpu,
}

impl From<ShadingLanguage> for BackendKind {
    fn from(language: ShadingLanguage) -> Self {
        match language {
            ShadingLanguage::Glsl => BackendKind::OpenGl,
            ShadingLanguage::Wgsl => BackendKind::WebGpu,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::OpenGl => "OpenGL",
            BackendKind::WebGpu => "WebGPU",
        })
    }
}

/// Rasterizes cross-sections of a model's material field.
///
/// Returned rasters have the frame's raster size; pixel row 0 is the bottom
/// edge (minimum of the frame's vertical axis) and column 0 the left edge, so
/// pixel coordinates are voxel coordinates.
pub trait RenderingBackend {
    fn kind(&self) -> BackendKind;

    /// Sizes (or resizes) the render target. May be called again between frames.
    fn init(&mut self, width: u32, height: u32, interactive: bool) -> anyhow::Result<()>;

    /// Builds the pipeline for `model` viewed through `frame`.
    fn prepare(&mut self, model: &ModelDescriptor, frame: &AxisFrame) -> anyhow::Result<()>;

    /// Renders the slice at `depth` along the frame's axis for the 1-based `material`.
    fn render(&mut self, depth: f32, material: usize) -> anyhow::Result<RgbaImage>;

    /// Releases GPU resources. Must be safe to call more than once.
    fn close(&mut self);
}

impl<B: RenderingBackend + ?Sized> RenderingBackend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn init(&mut self, width: u32, height: u32, interactive: bool) -> anyhow::Result<()> {
        (**self).init(width, height, interactive)
    }

    fn prepare(&mut self, model: &ModelDescriptor, frame: &AxisFrame) -> anyhow::Result<()> {
        (**self).prepare(model, frame)
    }

    fn render(&mut self, depth: f32, material: usize) -> anyhow::Result<RgbaImage> {
        (**self).render(depth, material)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Creates backends on demand when a session needs a different kind.
pub trait BackendFactory {
    fn create(&mut self, kind: BackendKind) -> anyhow::Result<Box<dyn RenderingBackend>>;
}

impl<F> BackendFactory for F
where
    F: FnMut(BackendKind) -> anyhow::Result<Box<dyn RenderingBackend>>,
{
    fn create(&mut self, kind: BackendKind) -> anyhow::Result<Box<dyn RenderingBackend>> {
        self(kind)
    }
}
