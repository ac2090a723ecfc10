// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ring-buffered GPU resources.
//!
//! A ring owns [`BUFFER_RING_SIZE`] instances of a resource. The CPU writes one
//! slot per frame while the GPU may still be reading the others. Slots are
//! selected by the caller, who must wait on the slot's completion fence before
//! writing it again.

use inlay_encoding::BUFFER_RING_SIZE;
use smallvec::{smallvec, SmallVec};

use crate::hal::{
    BufferDesc, BufferHandle, BufferUsages, GpuResourceAllocator, Resource, TextureDesc,
    TextureFormat, TextureHandle, TextureUsages, TextureViewHandle,
};
use crate::purgatory::GpuResources;
use crate::{Error, Result};

/// One instance of a ring-buffered resource.
pub trait RingSlot: Sized {
    /// Size the slot must at least have.
    type Size: Copy + PartialEq + std::fmt::Debug;
    /// Creation parameters shared by every slot of a ring.
    type Config;

    fn allocate<A: GpuResourceAllocator>(
        allocator: &mut A,
        config: &Self::Config,
        size: Self::Size,
    ) -> Result<Self>;

    fn fits(&self, size: Self::Size) -> bool;

    fn resources(&self) -> SmallVec<[Resource; 2]>;
}

pub struct Ring<S: RingSlot> {
    config: S::Config,
    target_size: S::Size,
    slots: [Option<S>; BUFFER_RING_SIZE],
    generations: [u64; BUFFER_RING_SIZE],
}

impl<S: RingSlot> Ring<S> {
    pub fn new(config: S::Config, target_size: S::Size) -> Self {
        Self {
            config,
            target_size,
            slots: std::array::from_fn(|_| None),
            generations: [0; BUFFER_RING_SIZE],
        }
    }

    pub fn target_size(&self) -> S::Size {
        self.target_size
    }

    /// Sets the size every slot grows to when it is next synchronized.
    pub fn set_target_size(&mut self, size: S::Size) {
        self.target_size = size;
    }

    /// Ensures the resource at `slot` is at least the target size.
    ///
    /// A slot that is too small is replaced, and the replaced resource is
    /// retired. Replacing a slot bumps its generation; bindings made to the
    /// old resource must be made again.
    pub fn synchronize_size_at<A: GpuResourceAllocator>(
        &mut self,
        slot: usize,
        resources: &mut GpuResources<A>,
    ) -> Result<()> {
        if let Some(current) = &self.slots[slot] {
            if current.fits(self.target_size) {
                return Ok(());
            }
        }
        let replacement = S::allocate(resources.allocator_mut(), &self.config, self.target_size)?;
        if let Some(old) = self.slots[slot].replace(replacement) {
            for resource in old.resources() {
                resources.retire(resource);
            }
        }
        self.generations[slot] += 1;
        Ok(())
    }

    /// Number of times `slot` has been (re)allocated.
    pub fn generation_at(&self, slot: usize) -> u64 {
        self.generations[slot]
    }

    pub fn slot(&self, slot: usize) -> Option<&S> {
        self.slots[slot].as_ref()
    }

    /// Retires every slot.
    pub fn release<A: GpuResourceAllocator>(&mut self, resources: &mut GpuResources<A>) {
        for slot in &mut self.slots {
            if let Some(old) = slot.take() {
                for resource in old.resources() {
                    resources.retire(resource);
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct BufferRingConfig {
    pub label: &'static str,
    pub usage: BufferUsages,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferSlot {
    pub buffer: BufferHandle,
    pub size: u64,
}

/// A range of a buffer bound to a descriptor.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

/// Byte offset of element `first` in a buffer of `T`.
pub(crate) fn element_offset<T>(first: u32) -> u64 {
    u64::from(first) * size_of::<T>() as u64
}

// Copies and writes of mapped contents operate on 4 byte words.
const BUFFER_SIZE_ALIGNMENT: u64 = 4;

impl RingSlot for BufferSlot {
    type Size = u64;
    type Config = BufferRingConfig;

    fn allocate<A: GpuResourceAllocator>(
        allocator: &mut A,
        config: &BufferRingConfig,
        size: u64,
    ) -> Result<Self> {
        let size = size
            .max(BUFFER_SIZE_ALIGNMENT)
            .next_multiple_of(BUFFER_SIZE_ALIGNMENT);
        let buffer = allocator.create_buffer(&BufferDesc {
            label: config.label,
            size,
            usage: config.usage,
        })?;
        Ok(Self { buffer, size })
    }

    fn fits(&self, size: u64) -> bool {
        self.size >= size
    }

    fn resources(&self) -> SmallVec<[Resource; 2]> {
        smallvec![Resource::Buffer(self.buffer)]
    }
}

pub type BufferRing = Ring<BufferSlot>;

impl BufferRing {
    pub fn with_usage(label: &'static str, usage: BufferUsages) -> Self {
        Self::new(BufferRingConfig { label, usage }, 0)
    }

    pub fn buffer_at(&self, slot: usize) -> Result<BufferHandle> {
        self.slot(slot)
            .map(|s| s.buffer)
            .ok_or(Error::UnknownResource(self.config.label))
    }

    /// Allocated size of `slot`, zero if it was never synchronized.
    pub fn size_at(&self, slot: usize) -> u64 {
        self.slot(slot).map_or(0, |s| s.size)
    }

    /// Binds `slot` from `offset` to its end.
    pub(crate) fn binding_at(&self, slot: usize, offset: u64) -> Result<BufferBinding> {
        let buffer = self.buffer_at(slot)?;
        Ok(BufferBinding {
            buffer,
            offset,
            size: self.size_at(slot).saturating_sub(offset),
        })
    }

    /// CPU-writable contents of `slot`, valid until [`Self::flush_mapped_contents_at`].
    pub fn contents_at<'a, A: GpuResourceAllocator>(
        &self,
        slot: usize,
        allocator: &'a mut A,
    ) -> Result<&'a mut [u8]> {
        allocator.buffer_contents(self.buffer_at(slot)?)
    }

    /// Makes the CPU writes to `slot` visible to the GPU.
    pub fn flush_mapped_contents_at<A: GpuResourceAllocator>(
        &self,
        slot: usize,
        allocator: &mut A,
    ) -> Result<()> {
        allocator.flush_mapped_buffer(self.buffer_at(slot)?)
    }
}

#[derive(Clone, Debug)]
pub struct TextureRingConfig {
    pub label: &'static str,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

#[derive(Clone, Copy, Debug)]
pub struct TextureSlot {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

impl RingSlot for TextureSlot {
    type Size = (u32, u32);
    type Config = TextureRingConfig;

    fn allocate<A: GpuResourceAllocator>(
        allocator: &mut A,
        config: &TextureRingConfig,
        (width, height): (u32, u32),
    ) -> Result<Self> {
        let (width, height) = (width.max(1), height.max(1));
        let texture = allocator.create_texture(&TextureDesc {
            label: config.label,
            width,
            height,
            mip_level_count: 1,
            format: config.format,
            usage: config.usage,
        })?;
        let view = allocator.create_texture_view(texture)?;
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    fn fits(&self, (width, height): (u32, u32)) -> bool {
        self.width >= width && self.height >= height
    }

    fn resources(&self) -> SmallVec<[Resource; 2]> {
        smallvec![Resource::TextureView(self.view), Resource::Texture(self.texture)]
    }
}

/// A ring of textures, such as ring-buffered upload targets.
pub type TextureRing = Ring<TextureSlot>;

impl TextureRing {
    pub fn with_format(label: &'static str, format: TextureFormat, usage: TextureUsages) -> Self {
        Self::new(
            TextureRingConfig {
                label,
                format,
                usage,
            },
            (1, 1),
        )
    }

    pub fn view_at(&self, slot: usize) -> Result<TextureViewHandle> {
        self.slot(slot)
            .map(|s| s.view)
            .ok_or(Error::UnknownResource(self.config.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostAllocator;

    #[test]
    fn growing_a_slot_retires_the_old_buffer() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let mut ring = BufferRing::with_usage("paths", BufferUsages::STORAGE);
        ring.set_target_size(64);
        ring.synchronize_size_at(0, &mut resources).unwrap();
        let small = ring.buffer_at(0).unwrap();
        assert_eq!(ring.generation_at(0), 1);

        // Shrinking keeps the larger buffer.
        ring.set_target_size(16);
        ring.synchronize_size_at(0, &mut resources).unwrap();
        assert_eq!(ring.buffer_at(0).unwrap(), small);

        ring.set_target_size(256);
        ring.synchronize_size_at(0, &mut resources).unwrap();
        assert_ne!(ring.buffer_at(0).unwrap(), small);
        assert_eq!(ring.generation_at(0), 2);
        assert_eq!(resources.purgatory().len(), 1);
        assert!(resources.allocator().is_live(small.0));
    }

    #[test]
    fn unsynchronized_slot_is_an_error() {
        let ring = BufferRing::with_usage("paint", BufferUsages::STORAGE);
        assert!(matches!(
            ring.buffer_at(1),
            Err(Error::UnknownResource("paint"))
        ));
    }

    #[test]
    fn texture_slots_grow_in_both_dimensions() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let mut ring = TextureRing::with_format(
            "uploads",
            TextureFormat::Rgba8Unorm,
            TextureUsages::SAMPLED | TextureUsages::TRANSFER_DST,
        );
        ring.set_target_size((32, 8));
        ring.synchronize_size_at(2, &mut resources).unwrap();
        let first = ring.view_at(2).unwrap();
        ring.set_target_size((16, 8));
        ring.synchronize_size_at(2, &mut resources).unwrap();
        assert_eq!(ring.view_at(2).unwrap(), first);
        ring.set_target_size((16, 9));
        ring.synchronize_size_at(2, &mut resources).unwrap();
        assert_ne!(ring.view_at(2).unwrap(), first);
        // Both the view and its texture are retired.
        assert_eq!(resources.purgatory().len(), 2);
    }
}
