// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Packing of shader and pipeline cache keys.
//!
//! Keys are plain integers so the caches can be simple hash maps. Each field
//! occupies its own bit range, so distinct inputs never share a key.

use crate::{DrawType, InterlockMode, LoadAction, ShaderFeatures, ShaderMiscFlags};

const DRAW_TYPE_BITS: u32 = 3;
const FEATURE_BITS: u32 = ShaderFeatures::COUNT as u32;
const INTERLOCK_BITS: u32 = 2;
const MISC_BITS: u32 = ShaderMiscFlags::COUNT as u32;

/// Draw render passes vary by load action and by whether the framebuffer is
/// BGRA or RGBA.
pub const RENDER_PASS_VARIANT_COUNT: usize = 6;

/// Identity of a compiled draw shader.
pub fn shader_unique_key(
    draw_type: DrawType,
    features: ShaderFeatures,
    interlock_mode: InterlockMode,
    misc: ShaderMiscFlags,
) -> u32 {
    let mut key = draw_type.key_bits();
    key = (key << FEATURE_BITS) | features.bits();
    key = (key << INTERLOCK_BITS) | interlock_mode.key_bits();
    key = (key << MISC_BITS) | misc.bits();
    debug_assert!(key < 1 << (DRAW_TYPE_BITS + FEATURE_BITS + INTERLOCK_BITS + MISC_BITS));
    key
}

/// Identity of a draw pipeline: its shader, whether it rasterizes as
/// wireframe, and which render pass variant it targets.
pub fn draw_pipeline_key(shader_key: u32, wireframe: bool, render_pass_variant: usize) -> u32 {
    debug_assert!(render_pass_variant < RENDER_PASS_VARIANT_COUNT);
    let key = (shader_key << 1) | u32::from(wireframe);
    key * RENDER_PASS_VARIANT_COUNT as u32 + render_pass_variant as u32
}

/// Index of the render pass variant for a load action and framebuffer format.
pub fn render_pass_variant_index(load_action: LoadAction, is_bgra: bool) -> usize {
    (load_action.variant_bits() << 1) | usize::from(is_bgra)
}

/// Inverse of [`render_pass_variant_index`].
pub fn render_pass_variant_parts(index: usize) -> (LoadAction, bool) {
    debug_assert!(index < RENDER_PASS_VARIANT_COUNT);
    (LoadAction::from_variant_bits(index >> 1), index & 1 != 0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn misc_variants() -> [ShaderMiscFlags; 2] {
        [
            ShaderMiscFlags::default(),
            ShaderMiscFlags {
                fixed_function_color_blend: true,
            },
        ]
    }

    #[test]
    fn shader_keys_never_collide() {
        let mut seen = HashSet::new();
        for draw_type in DrawType::ALL {
            for bits in 0..(1 << ShaderFeatures::COUNT) {
                for interlock in InterlockMode::ALL {
                    for misc in misc_variants() {
                        let key = shader_unique_key(
                            draw_type,
                            ShaderFeatures::from_bits(bits),
                            interlock,
                            misc,
                        );
                        assert!(seen.insert(key), "duplicate key {key}");
                    }
                }
            }
        }
    }

    #[test]
    fn pipeline_keys_never_collide() {
        let mut seen = HashSet::new();
        for draw_type in DrawType::ALL {
            for interlock in InterlockMode::ALL {
                for misc in misc_variants() {
                    let shader = shader_unique_key(
                        draw_type,
                        ShaderFeatures::from_bits(0b10_1101),
                        interlock,
                        misc,
                    );
                    for wireframe in [false, true] {
                        for variant in 0..RENDER_PASS_VARIANT_COUNT {
                            assert!(seen.insert(draw_pipeline_key(shader, wireframe, variant)));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn render_pass_variants_cover_every_index_once() {
        let mut seen = [false; RENDER_PASS_VARIANT_COUNT];
        for action in LoadAction::ALL {
            for is_bgra in [false, true] {
                let index = render_pass_variant_index(action, is_bgra);
                assert!(!seen[index]);
                seen[index] = true;
                assert_eq!(render_pass_variant_parts(index), (action, is_bgra));
            }
        }
        assert!(seen.iter().all(|&s| s));
    }
}
