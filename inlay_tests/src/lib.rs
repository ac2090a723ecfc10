// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Inlay tests.
//!
//! Everything here runs against the [`HostAllocator`], so command streams
//! and resource lifetimes can be checked without a GPU.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
// The following lints are part of the Linebender standard set,
// but resolving them has been deferred for now.
#![allow(
    missing_debug_implementations,
    unreachable_pub,
    missing_docs,
    clippy::missing_assert_message,
    reason = "Deferred"
)]

use anyhow::Result;
use inlay::{
    DeviceFeatures, FlushBufferKind, GpuResourceAllocator, HostAllocator, Recording,
    RenderContext, RenderTarget, TextureDesc, TextureFormat, TextureUsages,
};

/// Size every flush buffer is given by [`prepare_frame`].
pub const FLUSH_BUFFER_SIZE: u64 = 4096;

pub struct TestParams {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub target_usage: TextureUsages,
    pub features: DeviceFeatures,
}

impl TestParams {
    /// A target that can be read back as an input attachment, on a device
    /// with every optional feature.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            target_usage: TextureUsages::COLOR_ATTACHMENT | TextureUsages::INPUT_ATTACHMENT,
            features: DeviceFeatures::all(),
        }
    }
}

pub fn context(params: &TestParams) -> Result<RenderContext<HostAllocator>> {
    Ok(RenderContext::new(HostAllocator::new(), params.features)?)
}

/// Creates a render target together with the texture it draws into.
pub fn render_target(
    context: &mut RenderContext<HostAllocator>,
    params: &TestParams,
) -> Result<RenderTarget> {
    let target = RenderTarget::new(
        params.width,
        params.height,
        params.format,
        params.target_usage,
    );
    let allocator = context.resources_mut().allocator_mut();
    let texture = allocator.create_texture(&TextureDesc {
        label: "target",
        width: params.width,
        height: params.height,
        mip_level_count: 1,
        format: params.format,
        usage: params.target_usage,
    })?;
    let view = allocator.create_texture_view(texture)?;
    target.set_target_texture(texture, view);
    Ok(target)
}

/// Starts a frame with every flush buffer [`FLUSH_BUFFER_SIZE`] bytes long.
pub fn prepare_frame(context: &mut RenderContext<HostAllocator>) -> Result<()> {
    for kind in FlushBufferKind::ALL {
        context.resize_flush_buffer(kind, FLUSH_BUFFER_SIZE);
    }
    context.prepare_to_map_buffers()?;
    Ok(())
}

/// The current frame's contents of a flush buffer, as elements of `T`.
pub fn read_flush_buffer<T: bytemuck::Pod>(
    context: &mut RenderContext<HostAllocator>,
    kind: FlushBufferKind,
) -> Result<Vec<T>> {
    let contents = context.map_flush_buffer(kind)?;
    Ok(contents
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn command_names(recording: &Recording) -> Vec<&'static str> {
    recording
        .commands
        .iter()
        .map(|command| command.name())
        .collect()
}

pub fn count_commands(recording: &Recording, name: &str) -> usize {
    recording
        .commands
        .iter()
        .filter(|command| command.name() == name)
        .count()
}
