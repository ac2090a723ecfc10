// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred destruction of GPU objects.
//!
//! The CPU runs up to [`BUFFER_RING_SIZE`] frames ahead of the GPU, so a
//! resource released in frame `F` may still be referenced by command buffers
//! until frame `F + BUFFER_RING_SIZE` begins. Released resources wait here
//! until then.

use std::collections::VecDeque;

use inlay_encoding::BUFFER_RING_SIZE;

use crate::hal::{GpuResourceAllocator, Resource};

const EXPIRATION_DELAY: u64 = BUFFER_RING_SIZE as u64;

struct Zombie {
    resource: Resource,
    expiration_frame: u64,
}

/// Resources waiting for the GPU to finish with them.
#[derive(Default)]
pub struct ResourcePurgatory {
    // Expiration frames are non-decreasing from front to back.
    zombies: VecDeque<Zombie>,
}

impl ResourcePurgatory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `resource` for destruction once `current_frame + BUFFER_RING_SIZE` is reached.
    pub fn retire(&mut self, resource: Resource, current_frame: u64) {
        let expiration_frame = current_frame + EXPIRATION_DELAY;
        debug_assert!(self
            .zombies
            .back()
            .map_or(true, |z| z.expiration_frame <= expiration_frame));
        self.zombies.push_back(Zombie {
            resource,
            expiration_frame,
        });
    }

    /// Destroys every resource whose expiration frame has been reached.
    ///
    /// Returns the number of resources destroyed.
    pub fn collect(
        &mut self,
        current_frame: u64,
        allocator: &mut impl GpuResourceAllocator,
    ) -> usize {
        let mut count = 0;
        while let Some(zombie) = self.zombies.front() {
            if zombie.expiration_frame > current_frame {
                break;
            }
            if let Some(zombie) = self.zombies.pop_front() {
                allocator.destroy(zombie.resource);
                count += 1;
            }
        }
        count
    }

    /// Destroys everything regardless of expiration. Only valid once the GPU is idle.
    pub fn drain(&mut self, allocator: &mut impl GpuResourceAllocator) {
        for zombie in self.zombies.drain(..) {
            allocator.destroy(zombie.resource);
        }
    }

    pub fn len(&self) -> usize {
        self.zombies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zombies.is_empty()
    }
}

/// Leased objects that are handed back for reuse rather than destroyed.
///
/// An object checked in during frame `F` can be checked out again from frame
/// `F + BUFFER_RING_SIZE` on. The pool holds at most `capacity` objects;
/// [`RecyclingPool::check_in`] gives the object back when it is full.
pub struct RecyclingPool<T> {
    entries: VecDeque<(T, u64)>,
    capacity: usize,
}

impl<T> RecyclingPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `item` to the pool, or hands it back if the pool is full.
    pub fn check_in(&mut self, item: T, current_frame: u64) -> Option<T> {
        if self.entries.len() >= self.capacity {
            return Some(item);
        }
        self.entries.push_back((item, current_frame + EXPIRATION_DELAY));
        None
    }

    /// Takes the oldest object if the GPU is guaranteed to be done with it.
    pub fn check_out(&mut self, current_frame: u64) -> Option<T> {
        match self.entries.front() {
            Some((_, expiration)) if *expiration <= current_frame => {
                self.entries.pop_front().map(|(item, _)| item)
            }
            _ => None,
        }
    }

    /// Removes every object regardless of expiration.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|(item, _)| item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resource allocator together with the frame counter and purgatory that
/// decide when its objects may be destroyed.
pub struct GpuResources<A> {
    allocator: A,
    purgatory: ResourcePurgatory,
    current_frame: u64,
}

impl<A: GpuResourceAllocator> GpuResources<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            purgatory: ResourcePurgatory::new(),
            current_frame: 0,
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn purgatory(&self) -> &ResourcePurgatory {
        &self.purgatory
    }

    /// Moves to the next frame, returning its number.
    pub fn advance_frame(&mut self) -> u64 {
        self.current_frame += 1;
        self.current_frame
    }

    /// Destroys whatever expired by the current frame.
    ///
    /// Call this only after waiting on the fence of the ring slot the new
    /// frame writes into.
    pub fn collect(&mut self) -> usize {
        self.purgatory.collect(self.current_frame, &mut self.allocator)
    }

    /// Destroys `resource` once no frame in flight can reference it.
    pub fn retire(&mut self, resource: Resource) {
        self.purgatory.retire(resource, self.current_frame);
    }

    pub(crate) fn drain(&mut self) {
        self.purgatory.drain(&mut self.allocator);
    }

    pub fn into_allocator(mut self) -> A {
        self.drain();
        self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{BufferDesc, BufferUsages};
    use crate::HostAllocator;

    fn buffer(allocator: &mut HostAllocator) -> Resource {
        let desc = BufferDesc {
            label: "zombie",
            size: 16,
            usage: BufferUsages::STORAGE,
        };
        Resource::Buffer(allocator.create_buffer(&desc).unwrap())
    }

    #[test]
    fn resources_outlive_ring_depth() {
        let mut resources = GpuResources::new(HostAllocator::new());
        let zombie = buffer(resources.allocator_mut());
        resources.retire(zombie);
        for frame in 1..EXPIRATION_DELAY {
            assert_eq!(resources.advance_frame(), frame);
            assert_eq!(resources.collect(), 0);
            assert!(resources.allocator().is_live(zombie.id()));
        }
        resources.advance_frame();
        assert_eq!(resources.collect(), 1);
        assert!(!resources.allocator().is_live(zombie.id()));
    }

    #[test]
    fn collect_stops_at_first_unexpired() {
        let mut allocator = HostAllocator::new();
        let mut purgatory = ResourcePurgatory::new();
        let early = buffer(&mut allocator);
        let late = buffer(&mut allocator);
        purgatory.retire(early, 0);
        purgatory.retire(late, 2);
        assert_eq!(purgatory.collect(EXPIRATION_DELAY, &mut allocator), 1);
        assert!(allocator.is_live(late.id()));
        assert_eq!(purgatory.len(), 1);
        assert_eq!(purgatory.collect(EXPIRATION_DELAY + 2, &mut allocator), 1);
        assert!(purgatory.is_empty());
    }

    #[test]
    fn pool_reuses_only_expired_entries() {
        let mut pool = RecyclingPool::new(2);
        assert_eq!(pool.check_in("a", 5), None);
        assert_eq!(pool.check_out(5 + EXPIRATION_DELAY - 1), None);
        assert_eq!(pool.check_out(5 + EXPIRATION_DELAY), Some("a"));
        assert!(pool.is_empty());
    }

    #[test]
    fn full_pool_hands_items_back() {
        let mut pool = RecyclingPool::new(1);
        assert_eq!(pool.check_in(1, 0), None);
        assert_eq!(pool.check_in(2, 0), Some(2));
        assert_eq!(pool.len(), 1);
    }
}
