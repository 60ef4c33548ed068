//! Drives a backend through one sweep of slices along an axis.
//!
//! The orchestrator owns no GPU state. It enforces the prepare-before-sweep
//! ordering, computes voxel-centre depths and stops at the first failure,
//! wrapping it with the axis, material, slice index and depth.

use image::RgbaImage;
use tracing::debug;

use crate::backend::RenderingBackend;
use crate::bounds::{Axis, Order};
use crate::error::{SliceError, SliceResult};
use crate::frame::AxisFrame;
use crate::model::ModelDescriptor;
use crate::Scalar;

/// One slice handed to a consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceDescriptor {
    /// Position in the sweep's emission order.
    pub index: usize,
    /// Coordinate along the swept axis, at a voxel centre.
    pub depth: Scalar,
    pub voxel_radius: Scalar,
}

/// Receives rendered slices in sweep order.
pub trait SliceConsumer {
    fn process(&mut self, slice: &SliceDescriptor, raster: &RgbaImage) -> anyhow::Result<()>;
}

impl<F> SliceConsumer for F
where
    F: FnMut(&SliceDescriptor, &RgbaImage) -> anyhow::Result<()>,
{
    fn process(&mut self, slice: &SliceDescriptor, raster: &RgbaImage) -> anyhow::Result<()> {
        self(slice, raster)
    }
}

/// Slice count and spacing for a sweep along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPlan {
    pub axis: Axis,
    pub count: usize,
    /// Box minimum on the swept axis.
    pub min: Scalar,
    pub delta: Scalar,
}

impl SweepPlan {
    pub fn voxel_radius(&self) -> Scalar {
        0.5 * self.delta
    }

    /// Depth of the `n`-th emitted slice; `n < self.count`.
    fn depth(&self, n: usize, order: Order) -> Scalar {
        let step = match order {
            Order::MinToMax => n,
            Order::MaxToMin => self.count - 1 - n,
        };
        self.min + self.voxel_radius() + step as Scalar * self.delta
    }

    pub fn slices(&self, order: Order) -> impl Iterator<Item = SliceDescriptor> + '_ {
        (0..self.count).map(move |index| SliceDescriptor {
            index,
            depth: self.depth(index, order),
            voxel_radius: self.voxel_radius(),
        })
    }
}

/// Voxel-centre depths for `count` slices starting at `min`.
pub fn slice_depths(min: Scalar, delta: Scalar, count: usize, order: Order) -> Vec<Scalar> {
    let plan = SweepPlan {
        axis: Axis::Z,
        count,
        min,
        delta,
    };
    plan.slices(order).map(|s| s.depth).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    #[default]
    Idle,
    FramePrepared(Axis),
    Sweeping(Axis),
}

#[derive(Debug, Default)]
pub struct SliceOrchestrator {
    state: SweepState,
}

impl SliceOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Forgets any prepared frame, e.g. after the backend was replaced.
    pub fn reset(&mut self) {
        self.state = SweepState::Idle;
    }

    /// Sizes the backend for `frame` and builds its pipeline for `model`.
    pub fn prepare(
        &mut self,
        backend: &mut dyn RenderingBackend,
        model: &ModelDescriptor,
        frame: &AxisFrame,
        interactive: bool,
    ) -> SliceResult<()> {
        let axis = frame.axis;
        self.state = SweepState::Idle;
        debug!(
            %axis,
            kind = %backend.kind(),
            width = frame.raster.width,
            height = frame.raster.height,
            "preparing frame"
        );
        backend
            .init(frame.raster.width, frame.raster.height, interactive)
            .and_then(|()| backend.prepare(model, frame))
            .map_err(|e| SliceError::Prepare {
                axis,
                source: e.into(),
            })?;
        self.state = SweepState::FramePrepared(axis);
        Ok(())
    }

    /// Renders every slice of `plan` for `material` and feeds it to `consumer`.
    ///
    /// The first backend or consumer error aborts the sweep; slices already
    /// delivered stay delivered.
    pub fn sweep(
        &mut self,
        backend: &mut dyn RenderingBackend,
        plan: &SweepPlan,
        material: usize,
        consumer: &mut dyn SliceConsumer,
        order: Order,
    ) -> SliceResult<()> {
        let axis = plan.axis;
        if self.state != SweepState::FramePrepared(axis) {
            return Err(SliceError::FrameNotPrepared { axis });
        }
        self.state = SweepState::Sweeping(axis);
        debug!(%axis, material, count = plan.count, ?order, "sweep started");

        for slice in plan.slices(order) {
            let raster = match backend.render(slice.depth, material) {
                Ok(raster) => raster,
                Err(e) => {
                    self.state = SweepState::Idle;
                    return Err(SliceError::Render {
                        axis,
                        material,
                        index: slice.index,
                        depth: slice.depth,
                        source: e.into(),
                    });
                }
            };
            if let Err(e) = consumer.process(&slice, &raster) {
                self.state = SweepState::Idle;
                return Err(SliceError::Consumer {
                    axis,
                    material,
                    index: slice.index,
                    depth: slice.depth,
                    source: e.into(),
                });
            }
        }

        self.state = SweepState::FramePrepared(axis);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::backend::BackendKind;
    use crate::bounds::{BoundingBox, Resolution};
    use crate::frame::axis_frame;
    use crate::model::ShadingLanguage;

    #[derive(Default)]
    struct ScriptedBackend {
        fail_at: Option<usize>,
        fail_prepare: bool,
        rendered: Vec<(Scalar, usize)>,
        size: (u32, u32),
    }

    impl RenderingBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::WebGpu
        }

        fn init(&mut self, width: u32, height: u32, _interactive: bool) -> anyhow::Result<()> {
            self.size = (width, height);
            Ok(())
        }

        fn prepare(&mut self, _model: &ModelDescriptor, _frame: &AxisFrame) -> anyhow::Result<()> {
            if self.fail_prepare {
                bail!("shader did not compile");
            }
            Ok(())
        }

        fn render(&mut self, depth: f32, material: usize) -> anyhow::Result<RgbaImage> {
            if self.fail_at == Some(self.rendered.len()) {
                bail!("device lost");
            }
            self.rendered.push((depth, material));
            Ok(RgbaImage::new(self.size.0, self.size.1))
        }

        fn close(&mut self) {}
    }

    fn accept(_: &SliceDescriptor, _: &RgbaImage) -> anyhow::Result<()> {
        Ok(())
    }

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            min: vec![0.0; 3],
            max: vec![3.0; 3],
            materials: vec!["a".into()],
            language: ShadingLanguage::Wgsl,
            shader: String::new(),
        }
    }

    fn frame(axis: Axis) -> AxisFrame {
        let bounds = BoundingBox::from_slices(&[0.0; 3], &[3.0; 3]).unwrap();
        let resolution = Resolution::uniform_microns(1000.0).unwrap();
        axis_frame(axis, &bounds, &resolution)
    }

    fn plan(count: usize) -> SweepPlan {
        SweepPlan {
            axis: Axis::Z,
            count,
            min: 0.0,
            delta: 1.0,
        }
    }

    #[test]
    fn depths_sit_on_voxel_centres() {
        assert_eq!(
            slice_depths(0.0, 1.0, 3, Order::MinToMax),
            vec![0.5, 1.5, 2.5]
        );
        assert_eq!(
            slice_depths(-1.0, 0.5, 4, Order::MaxToMin),
            vec![0.75, 0.25, -0.25, -0.75]
        );
        assert!(slice_depths(0.0, 1.0, 0, Order::MinToMax).is_empty());
        assert!(slice_depths(0.0, 1.0, 0, Order::MaxToMin).is_empty());

        let mut reversed = slice_depths(2.0, 0.25, 7, Order::MaxToMin);
        reversed.reverse();
        assert_eq!(reversed, slice_depths(2.0, 0.25, 7, Order::MinToMax));
    }

    #[test]
    fn sweep_without_prepare_is_rejected() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend::default();
        let mut sink = accept;
        let err = orchestrator
            .sweep(&mut backend, &plan(3), 1, &mut sink, Order::MinToMax)
            .unwrap_err();
        assert!(matches!(err, SliceError::FrameNotPrepared { axis: Axis::Z }));
        assert!(backend.rendered.is_empty());
    }

    #[test]
    fn sweep_on_other_axis_is_rejected() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend::default();
        orchestrator
            .prepare(&mut backend, &model(), &frame(Axis::X), false)
            .unwrap();
        let mut sink = accept;
        let err = orchestrator
            .sweep(&mut backend, &plan(3), 1, &mut sink, Order::MinToMax)
            .unwrap_err();
        assert!(matches!(err, SliceError::FrameNotPrepared { axis: Axis::Z }));
    }

    #[test]
    fn sweep_emits_every_slice_in_order() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend::default();
        orchestrator
            .prepare(&mut backend, &model(), &frame(Axis::Z), false)
            .unwrap();
        assert_eq!(backend.size, (4, 4));

        let mut seen = Vec::new();
        let mut sink = |slice: &SliceDescriptor, raster: &RgbaImage| -> anyhow::Result<()> {
            assert_eq!(raster.dimensions(), (4, 4));
            seen.push((slice.index, slice.depth, slice.voxel_radius));
            Ok(())
        };
        orchestrator
            .sweep(&mut backend, &plan(3), 1, &mut sink, Order::MaxToMin)
            .unwrap();
        assert_eq!(seen, vec![(0, 2.5, 0.5), (1, 1.5, 0.5), (2, 0.5, 0.5)]);
        assert_eq!(orchestrator.state(), SweepState::FramePrepared(Axis::Z));

        // The frame stays prepared for further materials.
        let mut sink = accept;
        orchestrator
            .sweep(&mut backend, &plan(3), 2, &mut sink, Order::MinToMax)
            .unwrap();
        assert_eq!(backend.rendered.len(), 6);
        assert!(backend.rendered[3..].iter().all(|&(_, m)| m == 2));
    }

    #[test]
    fn render_failure_aborts_with_context() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend {
            fail_at: Some(2),
            ..Default::default()
        };
        orchestrator
            .prepare(&mut backend, &model(), &frame(Axis::Z), false)
            .unwrap();

        let mut delivered = Vec::new();
        let mut sink = |slice: &SliceDescriptor, _: &RgbaImage| -> anyhow::Result<()> {
            delivered.push(slice.index);
            Ok(())
        };
        let err = orchestrator
            .sweep(&mut backend, &plan(5), 1, &mut sink, Order::MinToMax)
            .unwrap_err();
        assert_eq!(delivered, vec![0, 1]);
        match err {
            SliceError::Render {
                axis,
                material,
                index,
                depth,
                ..
            } => {
                assert_eq!(axis, Axis::Z);
                assert_eq!(material, 1);
                assert_eq!(index, 2);
                assert_eq!(depth, 2.5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(orchestrator.state(), SweepState::Idle);
    }

    #[test]
    fn consumer_failure_aborts_sweep() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend::default();
        orchestrator
            .prepare(&mut backend, &model(), &frame(Axis::Z), false)
            .unwrap();

        let mut sink = |slice: &SliceDescriptor, _: &RgbaImage| -> anyhow::Result<()> {
            if slice.index == 1 {
                bail!("disk full");
            }
            Ok(())
        };
        let err = orchestrator
            .sweep(&mut backend, &plan(3), 1, &mut sink, Order::MinToMax)
            .unwrap_err();
        assert!(matches!(err, SliceError::Consumer { index: 1, .. }));
        assert_eq!(backend.rendered.len(), 2);
        assert_eq!(orchestrator.state(), SweepState::Idle);
    }

    #[test]
    fn prepare_failure_leaves_orchestrator_idle() {
        let mut orchestrator = SliceOrchestrator::new();
        let mut backend = ScriptedBackend {
            fail_prepare: true,
            ..Default::default()
        };
        let err = orchestrator
            .prepare(&mut backend, &model(), &frame(Axis::Y), false)
            .unwrap_err();
        assert!(matches!(err, SliceError::Prepare { axis: Axis::Y, .. }));
        assert_eq!(orchestrator.state(), SweepState::Idle);
    }
}
