//! Slice counts and raster sizes derived from a bounding box and a voxel pitch.
//!
//! The rendering backends expect raster widths with even parity, so two
//! independent corrections are layered on the plain `round(extent / delta)`
//! count:
//! - the per-axis slice counts reported for the X and Y axes are bumped when the
//!   X count is odd (the Y count keys off the X parity, not its own);
//! - the raster of each axis frame is first stretched vertically so the
//!   cross-section is never compressed, then both sides are bumped when the
//!   width is odd.
//!
//! The sweep itself always uses the uncorrected count.

use crate::bounds::{Axis, BoundingBox, Resolution};
use crate::orchestrator::SweepPlan;
use crate::Scalar;

/// `round(extent / delta)`, rounding halves up.
pub fn slice_count(extent: Scalar, delta: Scalar) -> usize {
    (0.5 + extent / delta) as usize
}

fn bump_if_odd(n: usize) -> usize {
    if n % 2 == 1 {
        n + 1
    } else {
        n
    }
}

/// Width and height in pixels of a rasterized cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceGeometryPlanner {
    bounds: BoundingBox,
    resolution: Resolution,
}

impl SliceGeometryPlanner {
    pub fn new(bounds: BoundingBox, resolution: Resolution) -> Self {
        Self { bounds, resolution }
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Number of slices a sweep along `axis` emits.
    pub fn sweep_count(&self, axis: Axis) -> usize {
        slice_count(self.bounds.extent(axis), self.resolution.delta(axis))
    }

    /// Voxel grid dimension along `axis`, after parity correction.
    pub fn num_slices(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => bump_if_odd(self.sweep_count(Axis::X)),
            Axis::Y => {
                let ny = self.sweep_count(Axis::Y);
                if self.sweep_count(Axis::X) % 2 == 1 {
                    ny + 1
                } else {
                    ny
                }
            }
            Axis::Z => self.sweep_count(Axis::Z),
        }
    }

    /// Raster dimensions for the frame that slices along `axis`.
    pub fn raster_size(&self, axis: Axis) -> RasterSize {
        let (horizontal, vertical) = axis.in_plane();
        let width_extent = self.bounds.extent(horizontal);
        let height_extent = self.bounds.extent(vertical);
        let dh = self.resolution.delta(horizontal);
        let dv = self.resolution.delta(vertical);

        let aspect_ratio = (width_extent * dv) / (height_extent * dh);
        let mut width = slice_count(width_extent, dh);
        let mut height = slice_count(height_extent, dv);
        if aspect_ratio * (height as Scalar) < width as Scalar {
            height = (0.5 + width as Scalar / aspect_ratio) as usize;
        }

        if width % 2 == 1 {
            width += 1;
            height += 1;
        }

        RasterSize {
            width: width as u32,
            height: height as u32,
        }
    }

    pub fn sweep_plan(&self, axis: Axis) -> SweepPlan {
        SweepPlan {
            axis,
            count: self.sweep_count(axis),
            min: self.bounds.min_on(axis),
            delta: self.resolution.delta(axis),
        }
    }
}
