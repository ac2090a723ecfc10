// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A [`GpuResourceAllocator`] that keeps everything in host memory.
//!
//! Useful for headless tooling and for inspecting exactly which objects the
//! renderer creates, writes and destroys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::hal::{
    BufferDesc, BufferHandle, CompletionFence, DescriptorPoolDesc, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle, DescriptorWrite,
    FramebufferDesc, FramebufferHandle, GpuResourceAllocator, GraphicsPipelineDesc,
    PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle, RenderPassDesc, RenderPassHandle,
    Resource, ResourceId, ResourceKind, SamplerDesc, SamplerHandle, ShaderModuleDesc,
    ShaderModuleHandle, TextureDesc, TextureHandle, TextureViewHandle,
};
use crate::{Error, Result};

struct HostBuffer {
    desc: BufferDesc,
    contents: Vec<u8>,
    flush_count: usize,
}

struct HostDescriptorPool {
    desc: DescriptorPoolDesc,
    sets: Vec<DescriptorSetHandle>,
    reset_count: usize,
}

struct HostDescriptorSet {
    pool: DescriptorPoolHandle,
    layout: DescriptorSetLayoutHandle,
    writes: Vec<DescriptorWrite>,
}

enum HostObject {
    Buffer(HostBuffer),
    Texture(TextureDesc),
    TextureView(TextureHandle),
    Sampler(SamplerDesc),
    ShaderModule(ShaderModuleDesc),
    DescriptorSetLayout(DescriptorSetLayoutDesc),
    PipelineLayout(PipelineLayoutDesc),
    RenderPass(RenderPassDesc),
    Pipeline(GraphicsPipelineDesc),
    Framebuffer(FramebufferDesc),
    DescriptorPool(HostDescriptorPool),
}

impl HostObject {
    fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Texture(_) => ResourceKind::Texture,
            Self::TextureView(_) => ResourceKind::TextureView,
            Self::Sampler(_) => ResourceKind::Sampler,
            Self::ShaderModule(_) => ResourceKind::ShaderModule,
            Self::DescriptorSetLayout(_) => ResourceKind::DescriptorSetLayout,
            Self::PipelineLayout(_) => ResourceKind::PipelineLayout,
            Self::RenderPass(_) => ResourceKind::RenderPass,
            Self::Pipeline(_) => ResourceKind::Pipeline,
            Self::Framebuffer(_) => ResourceKind::Framebuffer,
            Self::DescriptorPool(_) => ResourceKind::DescriptorPool,
        }
    }
}

/// Host-memory implementation of [`GpuResourceAllocator`].
#[derive(Default)]
pub struct HostAllocator {
    objects: HashMap<ResourceId, HostObject>,
    descriptor_sets: HashMap<DescriptorSetHandle, HostDescriptorSet>,
    created: HashMap<ResourceKind, usize>,
    destroyed: Vec<Resource>,
    descriptor_sets_allocated: usize,
    memory_in_use: u64,
    memory_limit: Option<u64>,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails buffer and texture allocations once `bytes` are in use.
    pub fn with_memory_limit(bytes: u64) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.objects.values().filter(|o| o.kind() == kind).count()
    }

    /// Number of objects of `kind` created so far, destroyed or not.
    pub fn created_count(&self, kind: ResourceKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    /// Every destroyed resource, in destruction order.
    pub fn destroyed(&self) -> &[Resource] {
        &self.destroyed
    }

    pub fn memory_in_use(&self) -> u64 {
        self.memory_in_use
    }

    pub fn descriptor_sets_allocated(&self) -> usize {
        self.descriptor_sets_allocated
    }

    pub fn buffer_desc(&self, buffer: BufferHandle) -> Option<&BufferDesc> {
        match self.objects.get(&buffer.0) {
            Some(HostObject::Buffer(b)) => Some(&b.desc),
            _ => None,
        }
    }

    /// Contents as last written, without mapping the buffer.
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<&[u8]> {
        match self.objects.get(&buffer.0) {
            Some(HostObject::Buffer(b)) => Some(b.contents.as_slice()),
            _ => None,
        }
    }

    pub fn buffer_flush_count(&self, buffer: BufferHandle) -> usize {
        match self.objects.get(&buffer.0) {
            Some(HostObject::Buffer(b)) => b.flush_count,
            _ => 0,
        }
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        match self.objects.get(&texture.0) {
            Some(HostObject::Texture(desc)) => Some(desc),
            _ => None,
        }
    }

    /// The texture a view was created from.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        match self.objects.get(&view.0) {
            Some(HostObject::TextureView(texture)) => Some(*texture),
            _ => None,
        }
    }

    pub fn sampler_desc(&self, sampler: SamplerHandle) -> Option<&SamplerDesc> {
        match self.objects.get(&sampler.0) {
            Some(HostObject::Sampler(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn shader_module_desc(&self, module: ShaderModuleHandle) -> Option<&ShaderModuleDesc> {
        match self.objects.get(&module.0) {
            Some(HostObject::ShaderModule(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn descriptor_set_layout_desc(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Option<&DescriptorSetLayoutDesc> {
        match self.objects.get(&layout.0) {
            Some(HostObject::DescriptorSetLayout(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn pipeline_layout_desc(
        &self,
        layout: PipelineLayoutHandle,
    ) -> Option<&PipelineLayoutDesc> {
        match self.objects.get(&layout.0) {
            Some(HostObject::PipelineLayout(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn render_pass_desc(&self, render_pass: RenderPassHandle) -> Option<&RenderPassDesc> {
        match self.objects.get(&render_pass.0) {
            Some(HostObject::RenderPass(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> Option<&GraphicsPipelineDesc> {
        match self.objects.get(&pipeline.0) {
            Some(HostObject::Pipeline(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn framebuffer_desc(&self, framebuffer: FramebufferHandle) -> Option<&FramebufferDesc> {
        match self.objects.get(&framebuffer.0) {
            Some(HostObject::Framebuffer(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn descriptor_pool_desc(
        &self,
        pool: DescriptorPoolHandle,
    ) -> Option<&DescriptorPoolDesc> {
        match self.objects.get(&pool.0) {
            Some(HostObject::DescriptorPool(p)) => Some(&p.desc),
            _ => None,
        }
    }

    pub fn descriptor_pool_reset_count(&self, pool: DescriptorPoolHandle) -> usize {
        match self.objects.get(&pool.0) {
            Some(HostObject::DescriptorPool(p)) => p.reset_count,
            _ => 0,
        }
    }

    pub fn descriptor_set_layout(
        &self,
        set: DescriptorSetHandle,
    ) -> Option<DescriptorSetLayoutHandle> {
        self.descriptor_sets.get(&set).map(|s| s.layout)
    }

    /// Every write made to a live descriptor set, in order.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Option<&[DescriptorWrite]> {
        self.descriptor_sets.get(&set).map(|s| s.writes.as_slice())
    }

    fn reserve_memory(&mut self, label: &'static str, requested: u64) -> Result<()> {
        let in_use = self.memory_in_use + requested;
        if self.memory_limit.is_some_and(|limit| in_use > limit) {
            return Err(Error::OutOfMemory { label, requested });
        }
        self.memory_in_use = in_use;
        Ok(())
    }

    fn insert(&mut self, object: HostObject) -> ResourceId {
        let id = ResourceId::next();
        *self.created.entry(object.kind()).or_default() += 1;
        self.objects.insert(id, object);
        id
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> Result<&mut HostBuffer> {
        match self.objects.get_mut(&buffer.0) {
            Some(HostObject::Buffer(b)) => Ok(b),
            _ => Err(Error::UnknownResource("buffer")),
        }
    }

    fn pool_mut(&mut self, pool: DescriptorPoolHandle) -> Result<&mut HostDescriptorPool> {
        match self.objects.get_mut(&pool.0) {
            Some(HostObject::DescriptorPool(p)) => Ok(p),
            _ => Err(Error::UnknownResource("descriptor pool")),
        }
    }

    fn require(&self, id: ResourceId, kind: ResourceKind, name: &'static str) -> Result<()> {
        match self.objects.get(&id) {
            Some(object) if object.kind() == kind => Ok(()),
            _ => Err(Error::UnknownResource(name)),
        }
    }
}

impl GpuResourceAllocator for HostAllocator {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        self.reserve_memory(desc.label, desc.size)?;
        let id = self.insert(HostObject::Buffer(HostBuffer {
            desc: desc.clone(),
            contents: vec![0; desc.size as usize],
            flush_count: 0,
        }));
        Ok(BufferHandle(id))
    }

    fn buffer_contents(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        Ok(self.buffer_mut(buffer)?.contents.as_mut_slice())
    }

    fn flush_mapped_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.buffer_mut(buffer)?.flush_count += 1;
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        self.reserve_memory(desc.label, desc.size_in_bytes())?;
        Ok(TextureHandle(self.insert(HostObject::Texture(desc.clone()))))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<TextureViewHandle> {
        self.require(texture.0, ResourceKind::Texture, "texture")?;
        Ok(TextureViewHandle(self.insert(HostObject::TextureView(texture))))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        Ok(SamplerHandle(self.insert(HostObject::Sampler(desc.clone()))))
    }

    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleHandle> {
        Ok(ShaderModuleHandle(
            self.insert(HostObject::ShaderModule(desc.clone())),
        ))
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> Result<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(
            self.insert(HostObject::DescriptorSetLayout(desc.clone())),
        ))
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> Result<PipelineLayoutHandle> {
        for layout in &desc.set_layouts {
            self.require(
                layout.0,
                ResourceKind::DescriptorSetLayout,
                "descriptor set layout",
            )?;
        }
        Ok(PipelineLayoutHandle(
            self.insert(HostObject::PipelineLayout(desc.clone())),
        ))
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassHandle> {
        Ok(RenderPassHandle(
            self.insert(HostObject::RenderPass(desc.clone())),
        ))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle> {
        self.require(desc.layout.0, ResourceKind::PipelineLayout, "pipeline layout")?;
        self.require(desc.render_pass.0, ResourceKind::RenderPass, "render pass")?;
        self.require(desc.vertex_module.0, ResourceKind::ShaderModule, "shader module")?;
        self.require(desc.fragment_module.0, ResourceKind::ShaderModule, "shader module")?;
        Ok(PipelineHandle(self.insert(HostObject::Pipeline(desc.clone()))))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        self.require(desc.render_pass.0, ResourceKind::RenderPass, "render pass")?;
        for view in &desc.attachments {
            self.require(view.0, ResourceKind::TextureView, "texture view")?;
        }
        Ok(FramebufferHandle(
            self.insert(HostObject::Framebuffer(desc.clone())),
        ))
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDesc,
    ) -> Result<DescriptorPoolHandle> {
        Ok(DescriptorPoolHandle(self.insert(HostObject::DescriptorPool(
            HostDescriptorPool {
                desc: desc.clone(),
                sets: Vec::new(),
                reset_count: 0,
            },
        ))))
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle) -> Result<()> {
        let pool = self.pool_mut(pool)?;
        pool.reset_count += 1;
        let sets = std::mem::take(&mut pool.sets);
        for set in sets {
            self.descriptor_sets.remove(&set);
        }
        Ok(())
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        self.require(
            layout.0,
            ResourceKind::DescriptorSetLayout,
            "descriptor set layout",
        )?;
        let host_pool = self.pool_mut(pool)?;
        if host_pool.sets.len() >= host_pool.desc.max_sets as usize {
            return Err(Error::OutOfMemory {
                label: host_pool.desc.label,
                requested: 1,
            });
        }
        let set = DescriptorSetHandle::next();
        host_pool.sets.push(set);
        self.descriptor_sets.insert(
            set,
            HostDescriptorSet {
                pool,
                layout,
                writes: Vec::new(),
            },
        );
        self.descriptor_sets_allocated += 1;
        Ok(set)
    }

    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let host_set = self
            .descriptor_sets
            .get_mut(&set)
            .ok_or(Error::UnknownResource("descriptor set"))?;
        host_set.writes.extend_from_slice(writes);
        Ok(())
    }

    fn destroy(&mut self, resource: Resource) {
        let Some(object) = self.objects.remove(&resource.id()) else {
            log::warn!("destroying unknown {:?}", resource.kind());
            return;
        };
        match object {
            HostObject::Buffer(b) => self.memory_in_use -= b.desc.size,
            HostObject::Texture(desc) => self.memory_in_use -= desc.size_in_bytes(),
            HostObject::DescriptorPool(_) => {
                let pool = DescriptorPoolHandle(resource.id());
                self.descriptor_sets.retain(|_, set| set.pool != pool);
            }
            _ => {}
        }
        self.destroyed.push(resource);
    }
}

/// A fence the test or tool signals by hand.
#[derive(Default)]
pub struct HostFence {
    signaled: AtomicBool,
    wait_count: AtomicUsize,
}

impl HostFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Number of times [`CompletionFence::wait`] was called.
    pub fn wait_count(&self) -> usize {
        self.wait_count.load(Ordering::Relaxed)
    }
}

impl CompletionFence for HostFence {
    // Work on the host is complete as soon as it is recorded.
    fn wait(&self) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.signal();
    }

    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}
