// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Inlay is the GPU backend of a 2d vector graphics renderer built on
//! pixel-local storage.
//!
//! An upstream stage flattens a scene into ring-buffered path, paint,
//! contour, gradient and tessellation records plus an ordered list of
//! [`DrawBatch`]es. For each flush, the [`RenderContext`] records the GPU
//! work that turns those records into pixels:
//!
//! 1. complex color ramps are rendered, and simple ones copied, into the
//!    gradient texture,
//! 2. curves are tessellated into the tessellation texture,
//! 3. pending image uploads are synchronized,
//! 4. the draw list is rendered in one render pass whose color, clip,
//!    scratch and coverage planes live in pixel-local storage.
//!
//! Commands are appended to a [`Recording`]; executing and submitting it is
//! the embedder's job. GPU objects are created through a
//! [`GpuResourceAllocator`], of which this crate provides a host-memory
//! implementation ([`HostAllocator`]) and, with the `wgpu` feature, a wgpu
//! implementation.
//!
//! ```ignore
//! let mut context = RenderContext::new(HostAllocator::new(), DeviceFeatures::all())?;
//! context.resize_flush_buffer(FlushBufferKind::Path, paths_size);
//! context.prepare_to_map_buffers()?;
//! context.write_flush_buffer(FlushBufferKind::Path, 0, &paths)?;
//! context.unmap_flush_buffer(FlushBufferKind::Path)?;
//! let mut recording = Recording::default();
//! context.flush(&FlushDescriptor::new(&target, &batches), &mut recording)?;
//! ```

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
// The following lints are part of the Linebender standard set,
// but resolving them has been deferred for now.
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    unreachable_pub,
    clippy::cast_possible_truncation,
    clippy::missing_assert_message,
    reason = "Deferred"
)]

mod color_ramp;
mod context;
mod flush;
mod hal;
mod host;
mod pipeline;
mod purgatory;
mod recording;
mod render_buffer;
mod render_target;
mod ring;
mod tessellate;
mod texture;
#[cfg(feature = "wgpu")]
mod wgpu_allocator;

/// Styling primitives.
pub use peniko;

pub use inlay_encoding as encoding;
pub use inlay_encoding::{DrawType, IntRect, InterlockMode, LoadAction, ShaderFeatures};

pub use context::{DeviceFeatures, FlushBufferKind, PlatformFeatures, RenderContext};
pub use flush::{DrawBatch, FlushDescriptor, ImageMeshBuffers};
pub use hal::{
    AccessFlags, AttachmentDesc, BlendFactor, BlendState, BufferDesc, BufferHandle, BufferUsages,
    CompletionFence, CullMode, DescriptorPoolDesc, DescriptorPoolHandle, DescriptorResource,
    DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutEntry,
    DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite, FilterMode, FramebufferDesc,
    FramebufferHandle, FrontFace, GpuResourceAllocator, GraphicsPipelineDesc, ImageLayout,
    IndexFormat, LoadOp, MemoryBarrier, PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle,
    PipelineStages, PolygonMode, PrimitiveTopology, RenderPassDesc, RenderPassHandle, Resource,
    ResourceId, ResourceKind, SamplerDesc, SamplerHandle, ShaderModuleDesc, ShaderModuleHandle,
    ShaderProgram, ShaderStage, ShaderStages, StoreOp, TextureDesc, TextureFormat, TextureHandle,
    TextureUsages, TextureViewHandle, VertexAttribute, VertexBufferLayout, VertexFormat,
    VertexStepMode,
};
pub use host::{HostAllocator, HostFence};
pub use purgatory::{GpuResources, RecyclingPool, ResourcePurgatory};
pub use recording::{ClearValue, Command, ImageBarrier, Recording};
pub use render_buffer::{RenderBuffer, RenderBufferKind};
pub use render_target::{AttachmentRole, RenderTarget};
pub use ring::{BufferRing, Ring, RingSlot, TextureRing};
pub use texture::{mip_level_count, ImageTexture};
#[cfg(feature = "wgpu")]
pub use wgpu_allocator::{WgpuAllocator, WgpuFence};

/// Re-export of the wgpu version the `wgpu` allocator is built against.
#[cfg(feature = "wgpu")]
pub use wgpu;

use thiserror::Error;

/// Errors that can occur in Inlay.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A buffer or texture allocation didn't fit in GPU memory.
    #[error("Out of GPU memory allocating {requested} bytes for '{label}'")]
    OutOfMemory {
        label: &'static str,
        requested: u64,
    },
    /// The backend failed to create a GPU object.
    #[error("Couldn't create {0}")]
    ObjectCreation(&'static str),
    /// Used a handle that was never created or is already destroyed.
    #[error("{0} handle is not alive")]
    UnknownResource(&'static str),
    /// Pixel local storage needs fragment stores and atomics.
    #[error("Device doesn't support pixel local storage")]
    PixelLocalStorageUnsupported,
    /// A batch's draw type has no shader in the flush's interlock mode.
    #[error("{draw_type:?} draws are not available with {interlock_mode:?} interlock")]
    InvalidDrawType {
        draw_type: DrawType,
        interlock_mode: InterlockMode,
    },
    /// An image mesh batch was submitted without its vertex, UV and index buffers.
    #[error("Image mesh batch has no mesh buffers")]
    MissingImageMeshBuffers,
    /// A write to a mapped flush buffer ran past the end of its slot.
    #[error("Write of {end} bytes overflows the {size} byte '{label}' buffer")]
    WriteOutOfBounds {
        label: &'static str,
        end: u64,
        size: u64,
    },
    /// The render target was flushed before a target texture was assigned.
    #[error("Render target has no target texture")]
    NoTargetTexture,
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
