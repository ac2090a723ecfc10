// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// The kind of geometry a draw batch submits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DrawType {
    /// Path patches tessellated as a fan around the contour midpoint.
    MidpointFanPatches,
    /// Path patches covering only the outer curve of a contour.
    OuterCurvePatches,
    /// Triangles covering the interior of a path, drawn from the triangle ring.
    InteriorTriangulation,
    /// An axis-aligned image with an anti-aliased edge ring.
    ImageRect,
    /// An image mapped through caller-provided mesh buffers.
    ImageMesh,
    /// Full-screen resolve of atomic coverage into the color plane.
    AtomicResolve,
}

impl DrawType {
    pub const ALL: [Self; 6] = [
        Self::MidpointFanPatches,
        Self::OuterCurvePatches,
        Self::InteriorTriangulation,
        Self::ImageRect,
        Self::ImageMesh,
        Self::AtomicResolve,
    ];

    pub fn is_patch(self) -> bool {
        matches!(self, Self::MidpointFanPatches | Self::OuterCurvePatches)
    }

    pub fn is_image(self) -> bool {
        matches!(self, Self::ImageRect | Self::ImageMesh)
    }

    pub(crate) fn key_bits(self) -> u32 {
        match self {
            Self::MidpointFanPatches => 0,
            Self::OuterCurvePatches => 1,
            Self::InteriorTriangulation => 2,
            Self::ImageRect => 3,
            Self::ImageMesh => 4,
            Self::AtomicResolve => 5,
        }
    }
}

/// How draws synchronize their access to pixel-local storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InterlockMode {
    /// Fragment shader invocations on the same pixel are ordered by the hardware.
    RasterOrdering,
    /// Coverage is accumulated with atomics, and batches that overlap are
    /// separated by explicit barriers.
    Atomics,
    /// MSAA with depth/stencil. Flushing in this mode does nothing yet.
    DepthStencil,
}

impl InterlockMode {
    pub const ALL: [Self; 3] = [Self::RasterOrdering, Self::Atomics, Self::DepthStencil];

    pub(crate) fn key_bits(self) -> u32 {
        match self {
            Self::RasterOrdering => 0,
            Self::Atomics => 1,
            Self::DepthStencil => 2,
        }
    }
}

/// What happens to the render target's existing contents when a flush begins.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadAction {
    Clear,
    PreserveRenderTarget,
    DontCare,
}

impl LoadAction {
    pub const ALL: [Self; 3] = [Self::Clear, Self::PreserveRenderTarget, Self::DontCare];

    pub(crate) fn variant_bits(self) -> usize {
        match self {
            Self::Clear => 0,
            Self::PreserveRenderTarget => 1,
            Self::DontCare => 2,
        }
    }

    pub(crate) fn from_variant_bits(bits: usize) -> Self {
        match bits {
            0 => Self::Clear,
            1 => Self::PreserveRenderTarget,
            _ => Self::DontCare,
        }
    }
}

/// Optional shader functionality, each of which becomes a specialization
/// constant of the draw pipeline.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderFeatures {
    pub clipping: bool,
    pub clip_rect: bool,
    pub advanced_blend: bool,
    pub even_odd: bool,
    pub nested_clipping: bool,
    pub hsl_blend_modes: bool,
}

impl ShaderFeatures {
    /// Number of distinct features, and of specialization constants.
    pub const COUNT: usize = 6;

    pub const NONE: Self = Self {
        clipping: false,
        clip_rect: false,
        advanced_blend: false,
        even_odd: false,
        nested_clipping: false,
        hsl_blend_modes: false,
    };

    pub const ALL: Self = Self {
        clipping: true,
        clip_rect: true,
        advanced_blend: true,
        even_odd: true,
        nested_clipping: true,
        hsl_blend_modes: true,
    };

    /// The features in specialization-constant order.
    pub fn to_array(self) -> [bool; Self::COUNT] {
        [
            self.clipping,
            self.clip_rect,
            self.advanced_blend,
            self.even_odd,
            self.nested_clipping,
            self.hsl_blend_modes,
        ]
    }

    pub fn from_array(flags: [bool; Self::COUNT]) -> Self {
        let [clipping, clip_rect, advanced_blend, even_odd, nested_clipping, hsl_blend_modes] =
            flags;
        Self {
            clipping,
            clip_rect,
            advanced_blend,
            even_odd,
            nested_clipping,
            hsl_blend_modes,
        }
    }

    pub fn bits(self) -> u32 {
        self.to_array()
            .iter()
            .enumerate()
            .fold(0, |bits, (i, &on)| bits | (u32::from(on) << i))
    }

    pub fn from_bits(bits: u32) -> Self {
        let mut flags = [false; Self::COUNT];
        for (i, flag) in flags.iter_mut().enumerate() {
            *flag = bits & (1 << i) != 0;
        }
        Self::from_array(flags)
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::from_bits(self.bits() | other.bits())
    }
}

/// Shader variations that are not user-visible features.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderMiscFlags {
    /// The fragment shader writes color through fixed-function blending
    /// rather than reading the color plane back as an input attachment.
    pub fixed_function_color_blend: bool,
}

impl ShaderMiscFlags {
    pub const COUNT: usize = 1;

    pub fn bits(self) -> u32 {
        u32::from(self.fixed_function_color_blend)
    }
}
