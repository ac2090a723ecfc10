// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data shared between the CPU side of the Inlay renderer and its shaders.
//!
//! Nothing in this crate owns a GPU object. It describes the layout of the
//! bytes that the renderer writes into its ring buffers, the vocabulary of
//! draw types and interlock modes, and the packing of shader and pipeline
//! cache keys.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_assert_message,
    reason = "Deferred"
)]

mod config;
mod draw;
mod gpu_data;
mod key;
mod math;
mod patch;

pub use config::{
    binding, descriptor_limits, plane, set, BUFFER_RING_SIZE, GRAD_TEXTURE_WIDTH,
    TESS_TEXTURE_WIDTH,
};
pub use draw::{DrawType, InterlockMode, LoadAction, ShaderFeatures, ShaderMiscFlags};
pub use gpu_data::{
    ContourData, FlushUniforms, GradientSpan, ImageDrawUniforms, ImageRectVertex, PaintAuxData,
    PaintData, PathData, PatchVertex, TessVertexSpan, TriangleVertex,
};
pub use key::{
    draw_pipeline_key, render_pass_variant_index, render_pass_variant_parts, shader_unique_key,
    RENDER_PASS_VARIANT_COUNT,
};
pub use math::IntRect;
pub use patch::{
    generate_patch_buffer_data, patch_base_index, patch_index_count, IMAGE_RECT_INDICES,
    IMAGE_RECT_VERTICES, MIDPOINT_FAN_PATCH_SEGMENT_SPAN, OUTER_CURVE_PATCH_SEGMENT_SPAN,
    PATCH_INDEX_BUFFER_COUNT, PATCH_VERTEX_BUFFER_COUNT, TESS_SPAN_INDICES,
};
