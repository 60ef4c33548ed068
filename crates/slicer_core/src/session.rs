//! Binds one loaded model to one live rendering backend.

use tracing::{debug, info};

use crate::backend::{BackendFactory, BackendKind, RenderingBackend};
use crate::binvox::VolumeSlicer;
use crate::bounds::{Axis, BoundingBox, Order, Resolution};
use crate::error::{SliceError, SliceResult};
use crate::frame::axis_frame;
use crate::model::{Material, ModelDescriptor};
use crate::orchestrator::{SliceConsumer, SliceOrchestrator};
use crate::planner::SliceGeometryPlanner;

struct LoadedModel {
    descriptor: ModelDescriptor,
    planner: SliceGeometryPlanner,
}

/// Slicing context: resolution, the current model and the backend its
/// shading language needs.
///
/// Loading a model written in a different shading language closes the current
/// backend before the factory builds the next one; models sharing a language
/// reuse the live backend.
pub struct SlicingSession<F: BackendFactory> {
    resolution: Resolution,
    interactive: bool,
    factory: F,
    backend: Option<Box<dyn RenderingBackend>>,
    model: Option<LoadedModel>,
    orchestrator: SliceOrchestrator,
}

impl<F: BackendFactory> SlicingSession<F> {
    pub fn new(resolution: Resolution, interactive: bool, factory: F) -> Self {
        Self {
            resolution,
            interactive,
            factory,
            backend: None,
            model: None,
            orchestrator: SliceOrchestrator::new(),
        }
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn model(&self) -> Option<&ModelDescriptor> {
        self.model.as_ref().map(|m| &m.descriptor)
    }

    /// Validates `model` and makes it current, swapping the backend when the
    /// model needs a different kind.
    pub fn load_model(&mut self, model: ModelDescriptor) -> SliceResult<()> {
        let bounds = model.bounding_box()?;
        model.material_layout()?;
        let kind = BackendKind::from(model.language);

        if self.backend_kind() != Some(kind) {
            if let Some(mut previous) = self.backend.take() {
                debug!(kind = %previous.kind(), "closing backend");
                previous.close();
            }
            // The old model cannot outlive its backend.
            self.model = None;
            self.orchestrator.reset();
            debug!(%kind, "creating backend");
            let backend = self
                .factory
                .create(kind)
                .map_err(|e| SliceError::BackendCreate {
                    kind,
                    source: e.into(),
                })?;
            self.backend = Some(backend);
        }

        info!(
            %kind,
            materials = model.num_materials(),
            min = ?bounds.min(),
            max = ?bounds.max(),
            "model loaded"
        );
        self.orchestrator.reset();
        self.model = Some(LoadedModel {
            planner: SliceGeometryPlanner::new(bounds, self.resolution),
            descriptor: model,
        });
        Ok(())
    }

    fn loaded(&self) -> SliceResult<&LoadedModel> {
        self.model.as_ref().ok_or(SliceError::NoModel)
    }

    /// Number of materials of the current model; zero without a model.
    pub fn num_materials(&self) -> usize {
        self.model
            .as_ref()
            .map_or(0, |m| m.descriptor.num_materials())
    }

    pub fn material(&self, ordinal: usize) -> Option<Material> {
        self.model.as_ref()?.descriptor.material(ordinal)
    }

    pub fn materials(&self) -> Vec<Material> {
        self.model
            .as_ref()
            .map(|m| m.descriptor.materials().collect())
            .unwrap_or_default()
    }

    pub fn bounding_box(&self) -> SliceResult<BoundingBox> {
        Ok(*self.loaded()?.planner.bounds())
    }

    pub fn num_slices(&self, axis: Axis) -> SliceResult<usize> {
        Ok(self.loaded()?.planner.num_slices(axis))
    }

    /// Builds the frame for `axis` and prepares the backend to render it.
    pub fn prepare_render(&mut self, axis: Axis) -> SliceResult<()> {
        let model = self.model.as_ref().ok_or(SliceError::NoModel)?;
        let backend = self
            .backend
            .as_deref_mut()
            .ok_or(SliceError::BackendNotInitialized)?;
        let frame = axis_frame(axis, model.planner.bounds(), &self.resolution);
        self.orchestrator
            .prepare(backend, &model.descriptor, &frame, self.interactive)
    }

    /// Sweeps `axis` for the 1-based `material`, feeding each slice to `consumer`.
    pub fn render_slices(
        &mut self,
        axis: Axis,
        material: usize,
        consumer: &mut dyn SliceConsumer,
        order: Order,
    ) -> SliceResult<()> {
        let model = self.model.as_ref().ok_or(SliceError::NoModel)?;
        let count = model.descriptor.num_materials();
        if !(1..=count).contains(&material) {
            return Err(SliceError::MaterialOutOfRange {
                ordinal: material,
                count,
            });
        }
        let backend = self
            .backend
            .as_deref_mut()
            .ok_or(SliceError::BackendNotInitialized)?;
        let plan = model.planner.sweep_plan(axis);
        self.orchestrator
            .sweep(backend, &plan, material, consumer, order)
    }

    /// Releases the backend. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            debug!(kind = %backend.kind(), "closing backend");
            backend.close();
        }
        self.orchestrator.reset();
    }
}

impl<F: BackendFactory> Drop for SlicingSession<F> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<F: BackendFactory> VolumeSlicer for SlicingSession<F> {
    fn num_materials(&self) -> usize {
        SlicingSession::num_materials(self)
    }

    fn material(&self, ordinal: usize) -> Option<Material> {
        SlicingSession::material(self, ordinal)
    }

    fn bounding_box(&self) -> SliceResult<BoundingBox> {
        SlicingSession::bounding_box(self)
    }

    fn num_slices(&self, axis: Axis) -> SliceResult<usize> {
        SlicingSession::num_slices(self, axis)
    }

    fn prepare_render(&mut self, axis: Axis) -> SliceResult<()> {
        SlicingSession::prepare_render(self, axis)
    }

    fn render_slices(
        &mut self,
        axis: Axis,
        material: usize,
        consumer: &mut dyn SliceConsumer,
        order: Order,
    ) -> SliceResult<()> {
        SlicingSession::render_slices(self, axis, material, consumer, order)
    }
}
