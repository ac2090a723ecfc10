// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::Cell;

use crate::hal::{
    BufferDesc, BufferHandle, BufferUsages, DescriptorSetHandle, FilterMode, GpuResourceAllocator,
    ImageLayout, Resource, TextureDesc, TextureFormat, TextureHandle, TextureUsages,
    TextureViewHandle,
};
use crate::purgatory::GpuResources;
use crate::recording::{Command, Recording};
use crate::Result;

/// Number of mip levels in a full chain down to 1×1.
///
/// This is `floor(log2(max(width, height))) + 1`, which is also the index of
/// the highest set bit of `width | height`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let extent = (width | height).max(1);
    u32::BITS - extent.leading_zeros()
}

/// An RGBA8 image sampled by image draws.
///
/// Pixels are staged in an upload buffer when the texture is made, and
/// copied into the texture, with its mip chain, by the first flush that draws
/// it.
pub struct ImageTexture {
    width: u32,
    height: u32,
    mip_level_count: u32,
    texture: TextureHandle,
    view: TextureViewHandle,
    upload_buffer: Cell<Option<BufferHandle>>,
    descriptor_set: Cell<Option<(DescriptorSetHandle, u64)>>,
}

impl ImageTexture {
    pub(crate) fn new<A: GpuResourceAllocator>(
        resources: &mut GpuResources<A>,
        width: u32,
        height: u32,
        mip_level_count: u32,
        rgba: &[u8],
    ) -> Result<Self> {
        let allocator = resources.allocator_mut();
        let byte_count = u64::from(width) * u64::from(height) * 4;
        debug_assert_eq!(rgba.len() as u64, byte_count);
        let upload_buffer = allocator.create_buffer(&BufferDesc {
            label: "image upload",
            size: byte_count,
            usage: BufferUsages::TRANSFER_SRC,
        })?;
        let contents = allocator.buffer_contents(upload_buffer)?;
        let len = contents.len().min(rgba.len());
        contents[..len].copy_from_slice(&rgba[..len]);
        allocator.flush_mapped_buffer(upload_buffer)?;

        let texture = allocator.create_texture(&TextureDesc {
            label: "image texture",
            width,
            height,
            mip_level_count,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::SAMPLED
                | TextureUsages::TRANSFER_SRC
                | TextureUsages::TRANSFER_DST,
        })?;
        let view = allocator.create_texture_view(texture)?;
        Ok(Self {
            width,
            height,
            mip_level_count,
            texture,
            view,
            upload_buffer: Cell::new(Some(upload_buffer)),
            descriptor_set: Cell::new(None),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    /// Whether pixels are still waiting to be copied into the texture.
    pub fn has_pending_upload(&self) -> bool {
        self.upload_buffer.get().is_some()
    }

    /// Records the upload of the staged pixels and the generation of the
    /// mip chain, leaving every level readable by shaders.
    ///
    /// Does nothing once the upload has been recorded.
    pub(crate) fn synchronize<A: GpuResourceAllocator>(
        &self,
        resources: &mut GpuResources<A>,
        recording: &mut Recording,
    ) {
        let Some(upload_buffer) = self.upload_buffer.take() else {
            return;
        };
        let levels = self.mip_level_count;
        recording.image_barrier_mips(
            self.texture,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            0,
            levels,
        );
        recording.push(Command::CopyBufferToImage {
            buffer: upload_buffer,
            offset: 0,
            row_length: self.width,
            texture: self.texture,
            width: self.width,
            height: self.height,
        });

        // Each level is downsampled from the one above it, which must first
        // become a transfer source.
        let mut src_size = (self.width, self.height);
        for level in 1..levels {
            let dst_size = ((src_size.0 >> 1).max(1), (src_size.1 >> 1).max(1));
            recording.image_barrier_mips(
                self.texture,
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
                level - 1,
                1,
            );
            recording.push(Command::BlitMipLevel {
                texture: self.texture,
                src_level: level - 1,
                dst_level: level,
                src_size,
                dst_size,
                filter: FilterMode::Linear,
            });
            src_size = dst_size;
        }

        if levels > 1 {
            recording.image_barrier_mips(
                self.texture,
                ImageLayout::TransferSrc,
                ImageLayout::ShaderReadOnly,
                0,
                levels - 1,
            );
        }
        recording.image_barrier_mips(
            self.texture,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            levels - 1,
            1,
        );

        resources.retire(Resource::Buffer(upload_buffer));
    }

    /// The image descriptor set written for this texture during `frame`, if any.
    pub(crate) fn descriptor_set_for_frame(&self, frame: u64) -> Option<DescriptorSetHandle> {
        match self.descriptor_set.get() {
            Some((set, set_frame)) if set_frame == frame => Some(set),
            _ => None,
        }
    }

    pub(crate) fn cache_descriptor_set(&self, set: DescriptorSetHandle, frame: u64) {
        self.descriptor_set.set(Some((set, frame)));
    }

    pub(crate) fn release<A: GpuResourceAllocator>(self, resources: &mut GpuResources<A>) {
        if let Some(upload_buffer) = self.upload_buffer.take() {
            resources.retire(Resource::Buffer(upload_buffer));
        }
        resources.retire(Resource::TextureView(self.view));
        resources.retire(Resource::Texture(self.texture));
    }
}

/// Decodes an encoded image into its size and RGBA8 pixels.
#[cfg(feature = "decoders")]
pub(crate) fn decode_rgba(encoded: &[u8]) -> Option<(u32, u32, Vec<u8>)> {
    match image::load_from_memory(encoded) {
        Ok(decoded) => {
            let rgba = decoded.into_rgba8();
            let (width, height) = rgba.dimensions();
            Some((width, height, rgba.into_raw()))
        }
        Err(err) => {
            log::warn!("failed to decode image texture: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::ImageBarrier;
    use crate::HostAllocator;

    #[test]
    fn mip_count_matches_log2_of_the_larger_side() {
        let sizes: [(u32, u32); 7] = [
            (1, 1),
            (2, 1),
            (3, 5),
            (256, 17),
            (255, 256),
            (1000, 1),
            (1, 4096),
        ];
        for (w, h) in sizes {
            let expected = f64::from(w.max(h)).log2().floor() as u32 + 1;
            assert_eq!(mip_level_count(w, h), expected, "{w}x{h}");
        }
    }

    #[test]
    fn upload_generates_mips_then_becomes_readable() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let pixels = vec![255; 8 * 4 * 4];
        let image =
            ImageTexture::new(&mut resources, 8, 4, mip_level_count(8, 4), &pixels).unwrap();
        assert_eq!(image.mip_level_count(), 4);
        assert!(image.has_pending_upload());

        let mut recording = Recording::default();
        image.synchronize(&mut resources, &mut recording);
        assert!(!image.has_pending_upload());
        let names: Vec<_> = recording.commands.iter().map(Command::name).collect();
        assert_eq!(
            names,
            [
                "image_barrier",
                "copy_buffer_to_image",
                "image_barrier",
                "blit_mip_level",
                "image_barrier",
                "blit_mip_level",
                "image_barrier",
                "blit_mip_level",
                "image_barrier",
                "image_barrier",
            ]
        );
        let Command::BlitMipLevel { dst_size, .. } = recording.commands[7] else {
            panic!("expected the last blit");
        };
        assert_eq!(dst_size, (1, 1));
        assert_eq!(
            recording.commands[9],
            Command::ImageBarrier(ImageBarrier {
                texture: image.texture(),
                old_layout: ImageLayout::TransferDst,
                new_layout: ImageLayout::ShaderReadOnly,
                base_mip_level: 3,
                mip_level_count: 1,
            })
        );
        // The staging buffer is retired once its copy is recorded.
        assert_eq!(resources.purgatory().len(), 1);

        let mut again = Recording::default();
        image.synchronize(&mut resources, &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn single_level_upload_skips_blits() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let image = ImageTexture::new(&mut resources, 1, 1, 1, &[0, 0, 0, 255]).unwrap();
        let mut recording = Recording::default();
        image.synchronize(&mut resources, &mut recording);
        let names: Vec<_> = recording.commands.iter().map(Command::name).collect();
        assert_eq!(names, ["image_barrier", "copy_buffer_to_image", "image_barrier"]);
    }

    #[test]
    fn descriptor_set_cache_is_per_frame() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let image = ImageTexture::new(&mut resources, 1, 1, 1, &[0; 4]).unwrap();
        let set = DescriptorSetHandle::next();
        image.cache_descriptor_set(set, 7);
        assert_eq!(image.descriptor_set_for_frame(7), Some(set));
        assert_eq!(image.descriptor_set_for_frame(8), None);
    }

    #[cfg(feature = "decoders")]
    #[test]
    fn undecodable_bytes_yield_none() {
        assert!(decode_rgba(b"definitely not a png").is_none());
    }
}
