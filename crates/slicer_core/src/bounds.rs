//! Axes, sweep order, bounding boxes and voxel pitch.

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{SliceError, SliceResult};
use crate::Scalar;

/// Principal axis a slice stack is swept along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two axes spanning the cross-section, as (horizontal, vertical) raster axes.
    pub const fn in_plane(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }

    pub fn component(self, v: Vec3) -> Scalar {
        v[self.index()]
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Direction in which slice indices walk the swept axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    #[default]
    MinToMax,
    MaxToMin,
}

/// Axis-aligned model bounds in model length units (millimetres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min: Vec3,
    max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> SliceResult<Self> {
        for axis in Axis::ALL {
            let (lo, hi) = (axis.component(min), axis.component(max));
            if !lo.is_finite() || !hi.is_finite() || hi <= lo {
                return Err(SliceError::InvalidBoundingBox {
                    axis,
                    min: lo,
                    max: hi,
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Builds a box from loader output, which carries plain component lists.
    pub fn from_slices(min: &[Scalar], max: &[Scalar]) -> SliceResult<Self> {
        match (min, max) {
            ([x0, y0, z0], [x1, y1, z1]) => {
                Self::new(Vec3::new(*x0, *y0, *z0), Vec3::new(*x1, *y1, *z1))
            }
            _ => Err(SliceError::MalformedBoundingBox {
                min: min.len(),
                max: max.len(),
            }),
        }
    }

    pub fn min(&self) -> Vec3 {
        self.min
    }

    pub fn max(&self) -> Vec3 {
        self.max
    }

    pub fn min_on(&self, axis: Axis) -> Scalar {
        axis.component(self.min)
    }

    pub fn max_on(&self, axis: Axis) -> Scalar {
        axis.component(self.max)
    }

    pub fn extent(&self, axis: Axis) -> Scalar {
        self.max_on(axis) - self.min_on(axis)
    }
}

/// Per-axis voxel pitch in model units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    delta: Vec3,
}

impl Resolution {
    pub fn from_millimeters(delta: Vec3) -> SliceResult<Self> {
        for axis in Axis::ALL {
            let d = axis.component(delta);
            if !d.is_finite() || d <= 0.0 {
                return Err(SliceError::InvalidResolution { axis, delta: d });
            }
        }
        Ok(Self { delta })
    }

    /// Converts a requested resolution in microns to millimetre pitch.
    pub fn from_microns(microns: [Scalar; 3]) -> SliceResult<Self> {
        Self::from_millimeters(Vec3::from_array(microns) / 1000.0)
    }

    pub fn uniform_microns(microns: Scalar) -> SliceResult<Self> {
        Self::from_microns([microns; 3])
    }

    pub fn delta(&self, axis: Axis) -> Scalar {
        axis.component(self.delta)
    }

    /// Half the pitch; offsets slice depths onto voxel centres.
    pub fn voxel_radius(&self, axis: Axis) -> Scalar {
        0.5 * self.delta(axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_plane_axes_exclude_swept_axis() {
        for axis in Axis::ALL {
            let (h, v) = axis.in_plane();
            assert_ne!(h, axis);
            assert_ne!(v, axis);
            assert_ne!(h, v);
        }
        assert_eq!(Axis::Z.in_plane(), (Axis::X, Axis::Y));
    }

    #[test]
    fn rejects_wrong_component_count() {
        let err = BoundingBox::from_slices(&[0.0, 0.0], &[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            SliceError::MalformedBoundingBox { min: 2, max: 3 }
        ));
    }

    #[test]
    fn rejects_inverted_axis() {
        let err = BoundingBox::from_slices(&[0.0, 2.0, 0.0], &[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            SliceError::InvalidBoundingBox { axis: Axis::Y, .. }
        ));
    }

    #[test]
    fn extents_follow_corners() {
        let bounds = BoundingBox::from_slices(&[-1.0, 0.0, 2.0], &[1.0, 4.0, 3.0]).unwrap();
        assert_eq!(bounds.extent(Axis::X), 2.0);
        assert_eq!(bounds.extent(Axis::Y), 4.0);
        assert_eq!(bounds.extent(Axis::Z), 1.0);
        assert_eq!(bounds.min_on(Axis::Z), 2.0);
    }

    #[test]
    fn microns_convert_to_millimetres() {
        let res = Resolution::from_microns([1000.0, 500.0, 42.0]).unwrap();
        assert_eq!(res.delta(Axis::X), 1.0);
        assert_eq!(res.delta(Axis::Y), 0.5);
        assert!((res.delta(Axis::Z) - 0.042).abs() < 1e-7);
        assert_eq!(res.voxel_radius(Axis::Y), 0.25);
    }

    #[test]
    fn rejects_non_positive_resolution() {
        let err = Resolution::from_microns([100.0, 0.0, 100.0]).unwrap_err();
        assert!(matches!(
            err,
            SliceError::InvalidResolution { axis: Axis::Y, .. }
        ));
        assert!(Resolution::uniform_microns(-5.0).is_err());
    }
}
