// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layouts of the records the renderer writes into its ring buffers.
//!
//! These must be kept in sync with the structs the draw shaders read.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// One horizontal run of a complex color ramp, rendered as an instanced quad
/// into the gradient texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct GradientSpan {
    /// Packed left and right texel coordinates, 16 bits each.
    pub horizontal_span: u32,
    /// Texture row in the low 20 bits, with edge-extension flags above.
    pub y_with_flags: u32,
    pub color0: u32,
    pub color1: u32,
}

/// One run of tessellated vertices, rendered as an instanced quad pair into the
/// tessellation texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct TessVertexSpan {
    pub pts: [f32; 8],
    pub join_tangent: [f32; 2],
    pub y: f32,
    pub reflection_y: f32,
    pub x0_x1: i32,
    pub reflection_x0_x1: i32,
    pub segment_counts: u32,
    pub contour_id_with_flags: u32,
}

/// Vertex of the shared path patch geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct PatchVertex {
    pub local_vertex_id: f32,
    pub outset: f32,
    pub fill_coverage: f32,
    pub params: f32,
    pub mirrored_vertex_id: f32,
    pub mirrored_outset: f32,
    pub mirrored_fill_coverage: f32,
    pub padding: f32,
}

/// Vertex of the shared image rectangle geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct ImageRectVertex {
    pub x: f32,
    pub y: f32,
    /// Anti-aliasing ramp position; 1 inside the rect, 0 on the outer ring.
    pub aa_x: f32,
    pub aa_y: f32,
}

/// Vertex of the interior triangulation of a path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct TriangleVertex {
    pub point: [f32; 2],
    /// Winding weight in the high 16 bits, path id in the low 16.
    pub weight_path_id: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct PathData {
    pub matrix: [f32; 6],
    pub stroke_radius: f32,
    pub z_index: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct PaintData {
    pub params: u32,
    pub color_or_gradient: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct PaintAuxData {
    pub matrix: [f32; 4],
    pub translate: [f32; 2],
    pub clip_rect_inverse_matrix: [f32; 4],
    pub clip_rect_inverse_translate: [f32; 2],
    pub inverse_fwidth: [f32; 2],
    pub color_ramp_location: [f32; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct ContourData {
    pub midpoint: [f32; 2],
    pub path_id: u32,
    pub vertex_index0: u32,
}

/// Uniforms shared by every pass of a flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct FlushUniforms {
    pub gradient_inverse_viewport_y: f32,
    pub tess_inverse_viewport_y: f32,
    pub render_target_inverse_viewport_x: f32,
    pub render_target_inverse_viewport_y: f32,
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub color_clear_value: u32,
    pub coverage_clear_value: u32,
    /// Left, top, right, bottom.
    pub render_target_update_bounds: [i32; 4],
    pub path_id_granularity: u32,
    pub vertex_discard_value: f32,
    pub padding: [u32; 2],
}

/// Per-draw uniforms of image draws, addressed with a dynamic offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct ImageDrawUniforms {
    pub view_matrix: [f32; 4],
    pub translate: [f32; 2],
    pub opacity: f32,
    pub padding0: f32,
    pub clip_rect_inverse_matrix: [f32; 4],
    pub clip_rect_inverse_translate: [f32; 2],
    pub clip_id: u32,
    pub blend_mode: u32,
    pub z_index: u32,
    pub padding1: [u32; 3],
}

const_assert_eq!(size_of::<GradientSpan>(), 16);
const_assert_eq!(size_of::<TessVertexSpan>(), 64);
const_assert_eq!(size_of::<PatchVertex>(), 32);
const_assert_eq!(size_of::<ImageRectVertex>(), 16);
const_assert_eq!(size_of::<TriangleVertex>(), 12);
const_assert_eq!(size_of::<PathData>(), 32);
const_assert_eq!(size_of::<PaintData>(), 8);
const_assert_eq!(size_of::<PaintAuxData>(), 64);
const_assert_eq!(size_of::<ContourData>(), 16);
const_assert_eq!(size_of::<FlushUniforms>(), 64);
const_assert_eq!(size_of::<ImageDrawUniforms>(), 80);
