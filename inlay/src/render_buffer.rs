// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use inlay_encoding::BUFFER_RING_SIZE;

use crate::hal::{BufferHandle, BufferUsages, GpuResourceAllocator};
use crate::purgatory::GpuResources;
use crate::ring::BufferRing;
use crate::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderBufferKind {
    Vertex,
    Index,
}

/// Caller-owned mesh data, such as the vertices, UVs and indices of an image mesh.
///
/// Every [`RenderBuffer::map`] moves to the next of its [`BUFFER_RING_SIZE`]
/// slots, so contents in use by earlier frames are never overwritten.
pub struct RenderBuffer {
    kind: RenderBufferKind,
    ring: BufferRing,
    front: usize,
}

impl RenderBuffer {
    pub(crate) fn new(kind: RenderBufferKind, size_in_bytes: u64) -> Self {
        let (label, usage) = match kind {
            RenderBufferKind::Vertex => ("mesh vertices", BufferUsages::VERTEX),
            RenderBufferKind::Index => ("mesh indices", BufferUsages::INDEX),
        };
        let mut ring = BufferRing::with_usage(label, usage);
        ring.set_target_size(size_in_bytes);
        Self {
            kind,
            ring,
            // The first map lands in slot 0.
            front: BUFFER_RING_SIZE - 1,
        }
    }

    pub fn kind(&self) -> RenderBufferKind {
        self.kind
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.ring.target_size()
    }

    /// Advances to the next slot and returns its writable contents.
    pub fn map<'a, A: GpuResourceAllocator>(
        &mut self,
        resources: &'a mut GpuResources<A>,
    ) -> Result<&'a mut [u8]> {
        self.front = (self.front + 1) % BUFFER_RING_SIZE;
        self.ring.synchronize_size_at(self.front, resources)?;
        self.ring.contents_at(self.front, resources.allocator_mut())
    }

    pub fn unmap<A: GpuResourceAllocator>(&self, resources: &mut GpuResources<A>) -> Result<()> {
        self.ring.flush_mapped_contents_at(self.front, resources.allocator_mut())
    }

    /// The buffer written by the most recent [`RenderBuffer::map`].
    pub fn front_buffer(&self) -> Result<BufferHandle> {
        self.ring.buffer_at(self.front)
    }

    pub(crate) fn release<A: GpuResourceAllocator>(mut self, resources: &mut GpuResources<A>) {
        self.ring.release(resources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostAllocator;

    #[test]
    fn each_map_writes_a_fresh_slot() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let mut buffer = RenderBuffer::new(RenderBufferKind::Index, 12);
        assert!(buffer.front_buffer().is_err());

        let mut fronts = Vec::new();
        for frame in 0..BUFFER_RING_SIZE + 1 {
            buffer.map(&mut resources).unwrap()[0] = frame as u8;
            buffer.unmap(&mut resources).unwrap();
            fronts.push(buffer.front_buffer().unwrap());
        }
        // Slots cycle, and a revisited slot keeps its buffer.
        assert_ne!(fronts[0], fronts[1]);
        assert_ne!(fronts[1], fronts[2]);
        assert_eq!(fronts[0], fronts[BUFFER_RING_SIZE]);
        let allocator = resources.allocator();
        assert_eq!(allocator.read_buffer(fronts[1]).unwrap()[0], 1);
        assert_eq!(allocator.read_buffer(fronts[0]).unwrap()[0], BUFFER_RING_SIZE as u8);
        assert_eq!(allocator.buffer_flush_count(fronts[0]), 2);
    }
}
