//! Per-axis camera, projection and cross-section quad.
//!
//! A frame is computed once per (model, axis) pair; only the slice depth and the
//! material selector change between renders of the same frame.

use glam::{Mat4, Vec3};

use crate::bounds::{Axis, BoundingBox, Resolution};
use crate::planner::{RasterSize, SliceGeometryPlanner};
use crate::Scalar;

/// Distance from the origin at which the camera sits on the swept axis.
pub const CAMERA_DISTANCE: Scalar = 3.0;
pub const NEAR_PLANE: Scalar = 0.1;
pub const FAR_PLANE: Scalar = 100.0;

/// Vertex layout shared with the shaders: position followed by texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [Scalar; 3],
    pub uv: [Scalar; 2],
}

const _: () = assert!(core::mem::size_of::<QuadVertex>() == 20);

/// Two triangles covering the cross-section: (horizontal sign, vertical sign, uv).
const QUAD_CORNERS: [(Scalar, Scalar, [Scalar; 2]); 6] = [
    (-1.0, -1.0, [1.0, 0.0]),
    (1.0, -1.0, [0.0, 0.0]),
    (-1.0, 1.0, [1.0, 1.0]),
    (1.0, -1.0, [0.0, 0.0]),
    (1.0, 1.0, [0.0, 1.0]),
    (-1.0, 1.0, [1.0, 1.0]),
];

/// Everything a backend needs to rasterize cross-sections along one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisFrame {
    pub axis: Axis,
    pub raster: RasterSize,
    pub camera: Mat4,
    pub projection: Mat4,
    pub model: Mat4,
    pub quad: [QuadVertex; 6],
    /// Shader expression list forming the 3D evaluation point from the
    /// interpolated quad position (`fragVert`) and the slice depth (`u_slice`).
    pub selector: &'static str,
}

/// Builds the immutable frame for slicing `bounds` along `axis`.
pub fn axis_frame(axis: Axis, bounds: &BoundingBox, resolution: &Resolution) -> AxisFrame {
    let planner = SliceGeometryPlanner::new(*bounds, *resolution);
    let (horizontal, vertical) = axis.in_plane();

    let (eye, up, selector) = match axis {
        Axis::X => (
            Vec3::new(CAMERA_DISTANCE, 0.0, 0.0),
            Vec3::Z,
            "u_slice,fragVert.yz",
        ),
        Axis::Y => (
            Vec3::new(0.0, -CAMERA_DISTANCE, 0.0),
            Vec3::Z,
            "fragVert.x,u_slice,fragVert.z",
        ),
        Axis::Z => (
            Vec3::new(0.0, 0.0, CAMERA_DISTANCE),
            Vec3::Y,
            "fragVert.xy,u_slice",
        ),
    };

    let left = bounds.min_on(horizontal);
    let right = bounds.max_on(horizontal);
    let bottom = bounds.min_on(vertical);
    let top = bounds.max_on(vertical);

    let quad = QUAD_CORNERS.map(|(h, v, uv)| {
        let mut position = [0.0; 3];
        position[horizontal.index()] = if h < 0.0 { left } else { right };
        position[vertical.index()] = if v < 0.0 { bottom } else { top };
        QuadVertex { position, uv }
    });

    AxisFrame {
        axis,
        raster: planner.raster_size(axis),
        camera: Mat4::look_at_rh(eye, Vec3::ZERO, up),
        projection: Mat4::orthographic_rh(left, right, bottom, top, NEAR_PLANE, FAR_PLANE),
        model: Mat4::IDENTITY,
        quad,
        selector,
    }
}

impl AxisFrame {
    /// Full transform applied by the vertex stage.
    pub fn clip_from_model(&self) -> Mat4 {
        self.projection * self.camera * self.model
    }
}
