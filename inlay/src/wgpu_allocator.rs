// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A [`GpuResourceAllocator`] backed by a wgpu device.
//!
//! Buffers, textures, views and samplers are real wgpu objects. Pipeline
//! state objects, descriptor pools and sets are retained as descriptions in
//! an inner [`HostAllocator`], which the embedder's command executor reads
//! when it encodes a [`Recording`](crate::Recording).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hal::{
    BufferDesc, BufferHandle, BufferUsages, CompletionFence, DescriptorPoolDesc,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle,
    DescriptorWrite, FilterMode, FramebufferDesc, FramebufferHandle, GpuResourceAllocator,
    GraphicsPipelineDesc, PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle,
    RenderPassDesc, RenderPassHandle, Resource, SamplerDesc, SamplerHandle, ShaderModuleDesc,
    ShaderModuleHandle, TextureDesc, TextureFormat, TextureHandle, TextureUsages,
    TextureViewHandle,
};
use crate::{Error, HostAllocator, Result};

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TextureFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
    }
}

/// wgpu has no input attachments; they are bound as sampled textures.
fn texture_usages(usage: TextureUsages) -> wgpu::TextureUsages {
    let mut wgpu_usage = wgpu::TextureUsages::empty();
    if usage.intersects(
        TextureUsages::COLOR_ATTACHMENT
            | TextureUsages::INPUT_ATTACHMENT
            | TextureUsages::TRANSIENT_ATTACHMENT,
    ) {
        wgpu_usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.intersects(TextureUsages::SAMPLED | TextureUsages::INPUT_ATTACHMENT) {
        wgpu_usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsages::STORAGE) {
        wgpu_usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsages::TRANSFER_SRC) {
        wgpu_usage |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsages::TRANSFER_DST) {
        wgpu_usage |= wgpu::TextureUsages::COPY_DST;
    }
    wgpu_usage
}

fn buffer_usages(usage: BufferUsages) -> wgpu::BufferUsages {
    // Mapped contents are written with `Queue::write_buffer`.
    let mut wgpu_usage = wgpu::BufferUsages::COPY_DST;
    for (flag, wgpu_flag) in [
        (BufferUsages::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsages::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsages::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsages::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsages::TRANSFER_SRC, wgpu::BufferUsages::COPY_SRC),
    ] {
        if usage.contains(flag) {
            wgpu_usage |= wgpu_flag;
        }
    }
    wgpu_usage
}

fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub struct WgpuAllocator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    host: HostAllocator,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    textures: HashMap<TextureHandle, wgpu::Texture>,
    views: HashMap<TextureViewHandle, wgpu::TextureView>,
    samplers: HashMap<SamplerHandle, wgpu::Sampler>,
}

impl WgpuAllocator {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            host: HostAllocator::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Retained descriptions of every object, including pipeline state.
    pub fn host(&self) -> &HostAllocator {
        &self.host
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer)
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&texture)
    }

    pub fn texture_view(&self, view: TextureViewHandle) -> Option<&wgpu::TextureView> {
        self.views.get(&view)
    }

    pub fn sampler(&self, sampler: SamplerHandle) -> Option<&wgpu::Sampler> {
        self.samplers.get(&sampler)
    }

    /// Registers a texture the embedder created, such as a surface texture,
    /// so that it can be used as a render target.
    pub fn import_texture(
        &mut self,
        desc: &TextureDesc,
        texture: wgpu::Texture,
    ) -> Result<(TextureHandle, TextureViewHandle)> {
        let handle = self.host.create_texture(desc)?;
        let view_handle = self.host.create_texture_view(handle)?;
        self.views.insert(
            view_handle,
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
        );
        self.textures.insert(handle, texture);
        Ok((handle, view_handle))
    }

    /// A fence signaled once the work submitted so far has completed.
    ///
    /// Call this after submitting the frame's command buffers.
    pub fn fence(&self) -> Arc<WgpuFence> {
        let signaled = Arc::new(AtomicBool::new(false));
        let callback_signaled = signaled.clone();
        self.queue.on_submitted_work_done(move || {
            callback_signaled.store(true, Ordering::Release);
        });
        Arc::new(WgpuFence {
            device: self.device.clone(),
            signaled,
        })
    }
}

impl GpuResourceAllocator for WgpuAllocator {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        if desc.size > self.device.limits().max_buffer_size {
            return Err(Error::OutOfMemory {
                label: desc.label,
                requested: desc.size,
            });
        }
        // Writes through the queue must cover whole words.
        let size = desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let handle = self.host.create_buffer(&BufferDesc {
            size,
            ..desc.clone()
        })?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn buffer_contents(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        self.host.buffer_contents(buffer)
    }

    fn flush_mapped_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.host.flush_mapped_buffer(buffer)?;
        let wgpu_buffer = self
            .buffers
            .get(&buffer)
            .ok_or(Error::UnknownResource("buffer"))?;
        let contents = self
            .host
            .read_buffer(buffer)
            .ok_or(Error::UnknownResource("buffer"))?;
        if !contents.is_empty() {
            self.queue.write_buffer(wgpu_buffer, 0, contents);
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let max_side = self.device.limits().max_texture_dimension_2d;
        if desc.width > max_side || desc.height > max_side {
            return Err(Error::ObjectCreation("texture"));
        }
        let handle = self.host.create_texture(desc)?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<TextureViewHandle> {
        let wgpu_texture = self
            .textures
            .get(&texture)
            .ok_or(Error::UnknownResource("texture"))?;
        let view = wgpu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = self.host.create_texture_view(texture)?;
        self.views.insert(handle, view);
        Ok(handle)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let handle = self.host.create_sampler(desc)?;
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            mag_filter: filter_mode(desc.filter),
            min_filter: filter_mode(desc.filter),
            mipmap_filter: desc
                .mipmap_filter
                .map_or(wgpu::FilterMode::Nearest, filter_mode),
            lod_max_clamp: desc.lod_max_clamp,
            ..Default::default()
        });
        self.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleHandle> {
        self.host.create_shader_module(desc)
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> Result<DescriptorSetLayoutHandle> {
        self.host.create_descriptor_set_layout(desc)
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> Result<PipelineLayoutHandle> {
        self.host.create_pipeline_layout(desc)
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassHandle> {
        self.host.create_render_pass(desc)
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle> {
        self.host.create_graphics_pipeline(desc)
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        self.host.create_framebuffer(desc)
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDesc,
    ) -> Result<DescriptorPoolHandle> {
        self.host.create_descriptor_pool(desc)
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle) -> Result<()> {
        self.host.reset_descriptor_pool(pool)
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        self.host.allocate_descriptor_set(pool, layout)
    }

    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        self.host.write_descriptor_set(set, writes)
    }

    fn destroy(&mut self, resource: Resource) {
        match resource {
            Resource::Buffer(buffer) => {
                if let Some(buffer) = self.buffers.remove(&buffer) {
                    buffer.destroy();
                }
            }
            Resource::Texture(texture) => {
                if let Some(texture) = self.textures.remove(&texture) {
                    texture.destroy();
                }
            }
            Resource::TextureView(view) => {
                self.views.remove(&view);
            }
            Resource::Sampler(sampler) => {
                self.samplers.remove(&sampler);
            }
            _ => {}
        }
        self.host.destroy(resource);
    }
}

/// Signaled by the queue when the work submitted before it has completed.
pub struct WgpuFence {
    device: Arc<wgpu::Device>,
    signaled: Arc<AtomicBool>,
}

impl CompletionFence for WgpuFence {
    fn wait(&self) {
        if !self.is_signaled() {
            self.device.poll(wgpu::Maintain::Wait);
        }
    }

    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_attachments_are_sampled_render_attachments() {
        let usage =
            texture_usages(TextureUsages::COLOR_ATTACHMENT | TextureUsages::INPUT_ATTACHMENT);
        assert_eq!(
            usage,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        );
        assert_eq!(
            texture_usages(TextureUsages::STORAGE | TextureUsages::TRANSFER_DST),
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_DST
        );
    }

    #[test]
    fn buffers_are_always_writable_through_the_queue() {
        assert_eq!(
            buffer_usages(BufferUsages::STORAGE),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        );
        assert_eq!(
            buffer_usages(BufferUsages::TRANSFER_SRC | BufferUsages::INDEX),
            wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::COPY_DST
        );
    }
}
