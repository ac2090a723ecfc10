// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Number of frames the CPU may run ahead of the GPU.
///
/// Every per-frame resource is replicated this many times, and retired
/// resources wait this many frames before they are destroyed.
pub const BUFFER_RING_SIZE: usize = 3;

/// Width in texels of the color ramp (gradient) texture.
pub const GRAD_TEXTURE_WIDTH: u32 = 512;

/// Width in texels of the tessellation data texture.
pub const TESS_TEXTURE_WIDTH: u32 = 2048;

/// Descriptor set indices within a draw pipeline layout.
pub mod set {
    /// Bound once per flush.
    pub const PER_FLUSH: u32 = 0;
    /// Rebound for every batch that samples a different image.
    pub const PER_DRAW: u32 = 1;
    pub const SAMPLER: u32 = 2;
    pub const PLS_TEXTURE: u32 = 3;
    pub const COUNT: usize = 4;
}

/// Binding indices within the descriptor sets.
pub mod binding {
    pub const TESS_VERTEX_TEXTURE: u32 = 0;
    pub const GRAD_TEXTURE: u32 = 1;
    pub const IMAGE_TEXTURE: u32 = 2;
    pub const PATH_BUFFER: u32 = 3;
    pub const PAINT_BUFFER: u32 = 4;
    pub const PAINT_AUX_BUFFER: u32 = 5;
    pub const CONTOUR_BUFFER: u32 = 6;
    pub const FLUSH_UNIFORM_BUFFER: u32 = 7;
    pub const IMAGE_DRAW_UNIFORM_BUFFER: u32 = 8;

    // The sampler set mirrors the texture bindings it samples.
    static_assertions::const_assert_eq!(GRAD_TEXTURE + 1, IMAGE_TEXTURE);
}

/// Pixel-local-storage plane indices, used both as attachment indices in the
/// draw render pass and as bindings in the PLS descriptor set.
pub mod plane {
    pub const COLOR: u32 = 0;
    pub const CLIP: u32 = 1;
    pub const SCRATCH_COLOR: u32 = 2;
    pub const COVERAGE: u32 = 3;
    pub const COUNT: usize = 4;
}

/// Capacities of a per-flush descriptor pool.
pub mod descriptor_limits {
    pub const MAX_UNIFORM_UPDATES: u32 = 3;
    pub const MAX_DYNAMIC_UNIFORM_UPDATES: u32 = 1;
    /// Image descriptor sets a single pool can hand out before the flush must
    /// switch to a fresh pool.
    pub const MAX_IMAGE_TEXTURE_UPDATES: u32 = 256;
    pub const MAX_SAMPLED_IMAGE_UPDATES: u32 = 2 + MAX_IMAGE_TEXTURE_UPDATES;
    pub const MAX_STORAGE_BUFFER_UPDATES: u32 = 6;
    pub const MAX_INPUT_ATTACHMENT_UPDATES: u32 = 4;
    pub const MAX_STORAGE_IMAGE_UPDATES: u32 = 1;
    /// The color ramp, tessellation, per-flush and PLS sets, plus the image sets.
    pub const MAX_DESCRIPTOR_SETS: u32 = 4 + MAX_IMAGE_TEXTURE_UPDATES;
    /// Recycled descriptor pools kept around for reuse.
    pub const MAX_RECYCLED_POOLS: usize = 64;
}
