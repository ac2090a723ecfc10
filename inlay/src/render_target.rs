// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::Cell;

use crate::hal::{
    GpuResourceAllocator, ImageLayout, Resource, TextureDesc, TextureFormat, TextureHandle,
    TextureUsages, TextureViewHandle,
};
use crate::purgatory::GpuResources;
use crate::recording::Recording;
use crate::{Error, Result};

/// The auxiliary attachments a render target creates on demand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    /// Stand-in for a target texture that can't be read as an input attachment.
    OffscreenColor,
    Clip,
    ScratchColor,
    /// Coverage plane read as an input attachment.
    Coverage,
    /// Coverage plane accumulated with image atomics.
    CoverageAtomic,
}

impl AttachmentRole {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            Self::OffscreenColor => 0,
            Self::Clip => 1,
            Self::ScratchColor => 2,
            Self::Coverage => 3,
            Self::CoverageAtomic => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::OffscreenColor => "offscreen color",
            Self::Clip => "clip",
            Self::ScratchColor => "scratch color",
            Self::Coverage => "coverage",
            Self::CoverageAtomic => "atomic coverage",
        }
    }

    pub fn format(self, framebuffer_format: TextureFormat) -> TextureFormat {
        match self {
            Self::OffscreenColor => framebuffer_format,
            Self::Clip | Self::Coverage | Self::CoverageAtomic => TextureFormat::R32Uint,
            Self::ScratchColor => TextureFormat::Rgba8Unorm,
        }
    }

    pub fn usage(self) -> TextureUsages {
        match self {
            Self::OffscreenColor => {
                TextureUsages::COLOR_ATTACHMENT
                    | TextureUsages::INPUT_ATTACHMENT
                    | TextureUsages::TRANSFER_SRC
                    | TextureUsages::TRANSFER_DST
            }
            Self::Clip | Self::ScratchColor | Self::Coverage => {
                TextureUsages::COLOR_ATTACHMENT
                    | TextureUsages::INPUT_ATTACHMENT
                    | TextureUsages::TRANSIENT_ATTACHMENT
            }
            Self::CoverageAtomic => TextureUsages::STORAGE | TextureUsages::TRANSFER_DST,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Attachment {
    texture: TextureHandle,
    view: TextureViewHandle,
}

/// A surface the renderer draws into.
///
/// The embedder owns the target texture and assigns it with
/// [`RenderTarget::set_target_texture`], for instance once per swapchain
/// image. The pixel-local-storage planes are created the first time a flush
/// needs them and live as long as the target.
pub struct RenderTarget {
    width: u32,
    height: u32,
    framebuffer_format: TextureFormat,
    target_usage: TextureUsages,
    target: Cell<Option<Attachment>>,
    attachments: [Cell<Option<Attachment>>; AttachmentRole::COUNT],
}

impl RenderTarget {
    /// `target_usage` is the usage the embedder's target textures are created with.
    pub fn new(
        width: u32,
        height: u32,
        framebuffer_format: TextureFormat,
        target_usage: TextureUsages,
    ) -> Self {
        debug_assert!(matches!(
            framebuffer_format,
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm
        ));
        Self {
            width,
            height,
            framebuffer_format,
            target_usage,
            target: Cell::new(None),
            attachments: Default::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn framebuffer_format(&self) -> TextureFormat {
        self.framebuffer_format
    }

    /// Whether the target texture itself can be used with every flag in `usage`.
    pub fn supports_usage(&self, usage: TextureUsages) -> bool {
        self.target_usage.contains(usage)
    }

    pub fn set_target_texture(&self, texture: TextureHandle, view: TextureViewHandle) {
        self.target.set(Some(Attachment { texture, view }));
    }

    pub fn target_texture(&self) -> Result<TextureHandle> {
        self.target
            .get()
            .map(|t| t.texture)
            .ok_or(Error::NoTargetTexture)
    }

    pub fn target_view(&self) -> Result<TextureViewHandle> {
        self.target
            .get()
            .map(|t| t.view)
            .ok_or(Error::NoTargetTexture)
    }

    /// The texture of an attachment that has already been created.
    pub fn attachment_texture(&self, role: AttachmentRole) -> Option<TextureHandle> {
        self.attachments[role.index()].get().map(|a| a.texture)
    }

    pub fn attachment_view(&self, role: AttachmentRole) -> Option<TextureViewHandle> {
        self.attachments[role.index()].get().map(|a| a.view)
    }

    /// Returns the view of the attachment for `role`, creating it on first use.
    ///
    /// A new attachment is transitioned from undefined to the general layout,
    /// which it stays in between passes.
    pub fn ensure_attachment<A: GpuResourceAllocator>(
        &self,
        role: AttachmentRole,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        let slot = &self.attachments[role.index()];
        if let Some(attachment) = slot.get() {
            return Ok(attachment.view);
        }
        let allocator = resources.allocator_mut();
        let texture = allocator.create_texture(&TextureDesc {
            label: role.label(),
            width: self.width,
            height: self.height,
            mip_level_count: 1,
            format: role.format(self.framebuffer_format),
            usage: role.usage(),
        })?;
        let view = allocator.create_texture_view(texture)?;
        log::debug!(
            "created {} attachment for {}x{} render target",
            role.label(),
            self.width,
            self.height
        );
        recording.image_barrier(texture, ImageLayout::Undefined, ImageLayout::General);
        slot.set(Some(Attachment { texture, view }));
        Ok(view)
    }

    pub fn ensure_offscreen_color<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        self.ensure_attachment(AttachmentRole::OffscreenColor, resources, recording)
    }

    pub fn ensure_clip<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        self.ensure_attachment(AttachmentRole::Clip, resources, recording)
    }

    pub fn ensure_scratch_color<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        self.ensure_attachment(AttachmentRole::ScratchColor, resources, recording)
    }

    pub fn ensure_coverage<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        self.ensure_attachment(AttachmentRole::Coverage, resources, recording)
    }

    pub fn ensure_coverage_atomic<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) -> Result<TextureViewHandle> {
        self.ensure_attachment(AttachmentRole::CoverageAtomic, resources, recording)
    }

    /// Retires every attachment this target created. The target texture
    /// belongs to the embedder and is left alone.
    pub fn release_attachments<A: GpuResourceAllocator>(&self, resources: &mut GpuResources<A>) {
        for slot in &self.attachments {
            if let Some(attachment) = slot.take() {
                resources.retire(Resource::TextureView(attachment.view));
                resources.retire(Resource::Texture(attachment.texture));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Command, ImageBarrier};
    use crate::HostAllocator;

    #[test]
    fn attachments_are_created_once() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let target = RenderTarget::new(
            64,
            32,
            TextureFormat::Bgra8Unorm,
            TextureUsages::COLOR_ATTACHMENT,
        );
        let mut recording = Recording::default();
        let clip = target.ensure_clip(&mut resources, &mut recording).unwrap();
        assert_eq!(target.ensure_clip(&mut resources, &mut recording).unwrap(), clip);
        assert_eq!(recording.commands.len(), 1);
        let texture = target.attachment_texture(AttachmentRole::Clip).unwrap();
        assert_eq!(
            recording.commands[0],
            Command::ImageBarrier(ImageBarrier {
                texture,
                old_layout: ImageLayout::Undefined,
                new_layout: ImageLayout::General,
                base_mip_level: 0,
                mip_level_count: 1,
            })
        );
        let desc = resources.allocator().texture_desc(texture).unwrap();
        assert_eq!((desc.width, desc.height), (64, 32));
        assert_eq!(desc.format, TextureFormat::R32Uint);
    }

    #[test]
    fn offscreen_color_matches_the_framebuffer_format() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let target = RenderTarget::new(8, 8, TextureFormat::Rgba8Unorm, TextureUsages::empty());
        let mut recording = Recording::default();
        target
            .ensure_offscreen_color(&mut resources, &mut recording)
            .unwrap();
        let texture = target
            .attachment_texture(AttachmentRole::OffscreenColor)
            .unwrap();
        let desc = resources.allocator().texture_desc(texture).unwrap();
        assert_eq!(desc.format, TextureFormat::Rgba8Unorm);
        assert!(desc.usage.contains(TextureUsages::INPUT_ATTACHMENT));
    }

    #[test]
    fn usage_query_reflects_the_target_texture() {
        let target = RenderTarget::new(
            8,
            8,
            TextureFormat::Bgra8Unorm,
            TextureUsages::COLOR_ATTACHMENT | TextureUsages::INPUT_ATTACHMENT,
        );
        assert!(target.supports_usage(TextureUsages::INPUT_ATTACHMENT));
        assert!(!target.supports_usage(TextureUsages::INPUT_ATTACHMENT | TextureUsages::STORAGE));
        assert!(matches!(target.target_view(), Err(Error::NoTargetTexture)));
    }

    #[test]
    fn released_attachments_go_to_the_purgatory() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let target = RenderTarget::new(4, 4, TextureFormat::Bgra8Unorm, TextureUsages::empty());
        let mut recording = Recording::default();
        target.ensure_clip(&mut resources, &mut recording).unwrap();
        target
            .ensure_coverage_atomic(&mut resources, &mut recording)
            .unwrap();
        target.release_attachments(&mut resources);
        assert_eq!(resources.purgatory().len(), 4);
        assert!(target.attachment_view(AttachmentRole::Clip).is_none());
    }
}
