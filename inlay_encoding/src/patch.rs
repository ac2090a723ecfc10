// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static geometry shared by every flush.
//!
//! Path patches are instanced: one instance per tessellated curve segment
//! run, with the patch geometry describing where each vertex sits along the
//! run and how far it is outset for anti-aliasing.

use crate::{DrawType, ImageRectVertex, PatchVertex};

pub const MIDPOINT_FAN_PATCH_SEGMENT_SPAN: u32 = 8;
pub const OUTER_CURVE_PATCH_SEGMENT_SPAN: u32 = 17;

const MIDPOINT_FAN_PATCH_VERTEX_COUNT: u32 = 2 * (MIDPOINT_FAN_PATCH_SEGMENT_SPAN + 1) + 1;
const MIDPOINT_FAN_PATCH_INDEX_COUNT: u32 = 9 * MIDPOINT_FAN_PATCH_SEGMENT_SPAN;
const OUTER_CURVE_PATCH_VERTEX_COUNT: u32 = 2 * (OUTER_CURVE_PATCH_SEGMENT_SPAN + 1);
const OUTER_CURVE_PATCH_INDEX_COUNT: u32 =
    6 * OUTER_CURVE_PATCH_SEGMENT_SPAN + 3 * (OUTER_CURVE_PATCH_SEGMENT_SPAN - 1);

pub const PATCH_VERTEX_BUFFER_COUNT: usize =
    (MIDPOINT_FAN_PATCH_VERTEX_COUNT + OUTER_CURVE_PATCH_VERTEX_COUNT) as usize;
pub const PATCH_INDEX_BUFFER_COUNT: usize =
    (MIDPOINT_FAN_PATCH_INDEX_COUNT + OUTER_CURVE_PATCH_INDEX_COUNT) as usize;

/// Indices of the two quads drawn per tessellation span instance.
pub const TESS_SPAN_INDICES: [u16; 12] = [0, 1, 2, 2, 1, 3, 4, 5, 6, 6, 5, 7];

/// Inner corners (fully covered) followed by outer corners (zero coverage),
/// clockwise from the top left.
pub const IMAGE_RECT_VERTICES: [ImageRectVertex; 8] = [
    rect_vertex(0., 0., 1.),
    rect_vertex(1., 0., 1.),
    rect_vertex(1., 1., 1.),
    rect_vertex(0., 1., 1.),
    rect_vertex(0., 0., 0.),
    rect_vertex(1., 0., 0.),
    rect_vertex(1., 1., 0.),
    rect_vertex(0., 1., 0.),
];

/// The interior quad followed by one anti-aliasing quad per edge.
pub const IMAGE_RECT_INDICES: [u16; 30] = [
    0, 1, 2, 0, 2, 3, //
    4, 5, 0, 0, 5, 1, //
    5, 6, 1, 1, 6, 2, //
    6, 7, 2, 2, 7, 3, //
    7, 4, 3, 3, 4, 0,
];

const fn rect_vertex(x: f32, y: f32, aa: f32) -> ImageRectVertex {
    ImageRectVertex {
        x,
        y,
        aa_x: aa,
        aa_y: aa,
    }
}

/// Number of indices drawn per instance of a patch draw.
pub fn patch_index_count(draw_type: DrawType) -> u32 {
    match draw_type {
        DrawType::MidpointFanPatches => MIDPOINT_FAN_PATCH_INDEX_COUNT,
        DrawType::OuterCurvePatches => OUTER_CURVE_PATCH_INDEX_COUNT,
        _ => {
            debug_assert!(false, "{draw_type:?} is not a patch draw");
            0
        }
    }
}

/// First index of a patch type within the shared patch index buffer.
pub fn patch_base_index(draw_type: DrawType) -> u32 {
    match draw_type {
        DrawType::MidpointFanPatches => 0,
        DrawType::OuterCurvePatches => MIDPOINT_FAN_PATCH_INDEX_COUNT,
        _ => {
            debug_assert!(false, "{draw_type:?} is not a patch draw");
            0
        }
    }
}

/// Builds the shared path patch vertex and index buffers.
///
/// The midpoint fan patch comes first in both buffers. Indices are absolute,
/// so both patch types draw with a base vertex of zero.
pub fn generate_patch_buffer_data() -> (Vec<PatchVertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(PATCH_VERTEX_BUFFER_COUNT);
    let mut indices = Vec::with_capacity(PATCH_INDEX_BUFFER_COUNT);

    // Midpoint fan: a strip along the curve plus a fan into the midpoint.
    let span = MIDPOINT_FAN_PATCH_SEGMENT_SPAN;
    push_border(&mut vertices, &mut indices, span, 0);
    let center = vertices.len() as u16;
    vertices.push(PatchVertex {
        local_vertex_id: -1.,
        fill_coverage: 1.,
        params: 1.,
        mirrored_vertex_id: -1.,
        mirrored_fill_coverage: 1.,
        ..PatchVertex::default()
    });
    for i in 0..span as u16 {
        indices.extend_from_slice(&[center, inner(0, i), inner(0, i + 1)]);
    }

    // Outer curve: a strip along the curve plus a fan filling the hull.
    let span = OUTER_CURVE_PATCH_SEGMENT_SPAN;
    let base = vertices.len() as u16;
    push_border(&mut vertices, &mut indices, span, base);
    for i in 1..span as u16 {
        indices.extend_from_slice(&[inner(base, 0), inner(base, i), inner(base, i + 1)]);
    }

    debug_assert_eq!(vertices.len(), PATCH_VERTEX_BUFFER_COUNT);
    debug_assert_eq!(indices.len(), PATCH_INDEX_BUFFER_COUNT);
    (vertices, indices)
}

fn inner(base: u16, i: u16) -> u16 {
    base + 2 * i
}

fn outer(base: u16, i: u16) -> u16 {
    base + 2 * i + 1
}

fn push_border(vertices: &mut Vec<PatchVertex>, indices: &mut Vec<u16>, span: u32, base: u16) {
    for i in 0..=span {
        let id = i as f32;
        let mirrored = (span - i) as f32;
        for (outset, coverage) in [(0., 1.), (1., 0.)] {
            vertices.push(PatchVertex {
                local_vertex_id: id,
                outset,
                fill_coverage: coverage,
                params: 0.,
                mirrored_vertex_id: mirrored,
                mirrored_outset: outset,
                mirrored_fill_coverage: coverage,
                padding: 0.,
            });
        }
    }
    for i in 0..span as u16 {
        indices.extend_from_slice(&[
            outer(base, i),
            outer(base, i + 1),
            inner(base, i),
            inner(base, i),
            outer(base, i + 1),
            inner(base, i + 1),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_buffers_have_advertised_sizes() {
        let (vertices, indices) = generate_patch_buffer_data();
        assert_eq!(vertices.len(), PATCH_VERTEX_BUFFER_COUNT);
        assert_eq!(indices.len(), PATCH_INDEX_BUFFER_COUNT);
        assert!(indices
            .iter()
            .all(|&i| usize::from(i) < PATCH_VERTEX_BUFFER_COUNT));
    }

    #[test]
    fn patch_ranges_do_not_overlap() {
        let (_, indices) = generate_patch_buffer_data();
        let fan_end = patch_index_count(DrawType::MidpointFanPatches);
        assert_eq!(patch_base_index(DrawType::OuterCurvePatches), fan_end);
        let outer_end = fan_end + patch_index_count(DrawType::OuterCurvePatches);
        assert_eq!(outer_end as usize, indices.len());
        // Outer curve indices only reference outer curve vertices.
        let first_outer_vertex = MIDPOINT_FAN_PATCH_VERTEX_COUNT as u16;
        assert!(indices[fan_end as usize..]
            .iter()
            .all(|&i| i >= first_outer_vertex));
    }

    #[test]
    fn shared_index_lists_stay_in_bounds() {
        assert!(TESS_SPAN_INDICES.iter().all(|&i| i < 8));
        assert!(IMAGE_RECT_INDICES
            .iter()
            .all(|&i| usize::from(i) < IMAGE_RECT_VERTICES.len()));
        assert_eq!(IMAGE_RECT_INDICES.len() % 3, 0);
    }
}
