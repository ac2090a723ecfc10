// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use bytemuck::Pod;
use inlay_encoding::{
    descriptor_limits, generate_patch_buffer_data, BUFFER_RING_SIZE, IMAGE_RECT_INDICES,
    IMAGE_RECT_VERTICES, TESS_SPAN_INDICES,
};

use crate::color_ramp::{ColorRampPipeline, GRADIENT_TEXTURE_FORMAT};
use crate::hal::{
    BufferDesc, BufferHandle, BufferUsages, CompletionFence, DescriptorPoolHandle, FilterMode,
    FramebufferDesc, FramebufferHandle, GpuResourceAllocator, RenderPassHandle, Resource,
    SamplerDesc, SamplerHandle, TextureDesc, TextureHandle, TextureUsages, TextureViewHandle,
};
use crate::pipeline::{
    flush_descriptor_pool_desc, DrawPipeline, DrawPipelineLayout, DrawShader, KeyedCache,
    DRAW_PIPELINE_LAYOUT_COUNT,
};
use crate::purgatory::{GpuResources, RecyclingPool};
use crate::render_buffer::{RenderBuffer, RenderBufferKind};
use crate::render_target::RenderTarget;
use crate::ring::{BufferBinding, BufferRing};
use crate::tessellate::{TessellatePipeline, TESSELLATION_TEXTURE_FORMAT};
use crate::texture::{mip_level_count, ImageTexture};
use crate::{Error, Result};

/// Optional device capabilities the renderer takes advantage of.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    /// Blend state may differ per color attachment.
    pub independent_blend: bool,
    /// Line polygon mode, used for wireframe rendering.
    pub fill_mode_non_solid: bool,
    /// Fragment shaders may write storage images and use atomics. Required.
    pub fragment_stores_and_atomics: bool,
    /// Fragment invocations overlapping a pixel access attachments in
    /// primitive order.
    pub rasterization_order_color_attachment_access: bool,
}

impl DeviceFeatures {
    pub fn all() -> Self {
        Self {
            independent_blend: true,
            fill_mode_non_solid: true,
            fragment_stores_and_atomics: true,
            rasterization_order_color_attachment_access: true,
        }
    }
}

/// What the renderer can do on this device, derived from [`DeviceFeatures`].
///
/// Callers check these before choosing an interlock mode for their flushes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlatformFeatures {
    pub supports_pixel_local_storage: bool,
    /// [`InterlockMode::RasterOrdering`](crate::InterlockMode::RasterOrdering) is available.
    pub supports_raster_ordering: bool,
    pub invert_offscreen_y: bool,
    pub uninvert_on_screen_y: bool,
}

impl PlatformFeatures {
    fn new(features: &DeviceFeatures) -> Self {
        Self {
            supports_pixel_local_storage: features.fragment_stores_and_atomics,
            supports_raster_ordering: features.rasterization_order_color_attachment_access,
            invert_offscreen_y: false,
            uninvert_on_screen_y: true,
        }
    }
}

/// The ring-buffered buffers the upstream stage fills before each flush.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlushBufferKind {
    FlushUniform,
    ImageDrawUniform,
    Path,
    Paint,
    PaintAux,
    Contour,
    /// Texels of simple color ramps, copied into the gradient texture.
    SimpleColorRamp,
    GradientSpan,
    TessVertexSpan,
    Triangle,
}

impl FlushBufferKind {
    pub const COUNT: usize = 10;

    pub const ALL: [Self; Self::COUNT] = [
        Self::FlushUniform,
        Self::ImageDrawUniform,
        Self::Path,
        Self::Paint,
        Self::PaintAux,
        Self::Contour,
        Self::SimpleColorRamp,
        Self::GradientSpan,
        Self::TessVertexSpan,
        Self::Triangle,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FlushUniform => "flush uniforms",
            Self::ImageDrawUniform => "image draw uniforms",
            Self::Path => "paths",
            Self::Paint => "paints",
            Self::PaintAux => "paint aux",
            Self::Contour => "contours",
            Self::SimpleColorRamp => "simple color ramps",
            Self::GradientSpan => "gradient spans",
            Self::TessVertexSpan => "tessellation spans",
            Self::Triangle => "triangles",
        }
    }

    pub fn usage(self) -> BufferUsages {
        match self {
            Self::FlushUniform | Self::ImageDrawUniform => BufferUsages::UNIFORM,
            Self::Path | Self::Paint | Self::PaintAux | Self::Contour => BufferUsages::STORAGE,
            Self::SimpleColorRamp => BufferUsages::TRANSFER_SRC,
            Self::GradientSpan | Self::TessVertexSpan | Self::Triangle => BufferUsages::VERTEX,
        }
    }
}

/// A texture rendered by one of the auxiliary passes, with the framebuffer
/// that targets it.
pub(crate) struct RenderTexture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub framebuffer: FramebufferHandle,
    pub width: u32,
    pub height: u32,
}

impl RenderTexture {
    fn new<A: GpuResourceAllocator>(
        allocator: &mut A,
        desc: &TextureDesc,
        render_pass: RenderPassHandle,
    ) -> Result<Self> {
        let texture = allocator.create_texture(desc)?;
        let view = allocator.create_texture_view(texture)?;
        let framebuffer = allocator.create_framebuffer(&FramebufferDesc {
            label: desc.label,
            render_pass,
            attachments: [view].into_iter().collect(),
            width: desc.width,
            height: desc.height,
        })?;
        Ok(Self {
            texture,
            view,
            framebuffer,
            width: desc.width,
            height: desc.height,
        })
    }

    fn retire<A: GpuResourceAllocator>(self, resources: &mut GpuResources<A>) {
        resources.retire(Resource::Framebuffer(self.framebuffer));
        resources.retire(Resource::TextureView(self.view));
        resources.retire(Resource::Texture(self.texture));
    }
}

/// Geometry that never changes after the context is created.
pub(crate) struct StaticBuffers {
    pub tess_span_indices: BufferHandle,
    pub patch_vertices: BufferHandle,
    pub patch_indices: BufferHandle,
    pub image_rect_vertices: BufferHandle,
    pub image_rect_indices: BufferHandle,
}

fn upload_static_buffer<A: GpuResourceAllocator>(
    allocator: &mut A,
    label: &'static str,
    usage: BufferUsages,
    bytes: &[u8],
) -> Result<BufferHandle> {
    let buffer = allocator.create_buffer(&BufferDesc {
        label,
        size: bytes.len() as u64,
        usage,
    })?;
    allocator.buffer_contents(buffer)?[..bytes.len()].copy_from_slice(bytes);
    allocator.flush_mapped_buffer(buffer)?;
    Ok(buffer)
}

impl StaticBuffers {
    fn new<A: GpuResourceAllocator>(allocator: &mut A) -> Result<Self> {
        let (patch_vertices, patch_indices) = generate_patch_buffer_data();
        Ok(Self {
            tess_span_indices: upload_static_buffer(
                allocator,
                "tessellation span indices",
                BufferUsages::INDEX,
                bytemuck::cast_slice(&TESS_SPAN_INDICES),
            )?,
            patch_vertices: upload_static_buffer(
                allocator,
                "patch vertices",
                BufferUsages::VERTEX,
                bytemuck::cast_slice(&patch_vertices),
            )?,
            patch_indices: upload_static_buffer(
                allocator,
                "patch indices",
                BufferUsages::INDEX,
                bytemuck::cast_slice(&patch_indices),
            )?,
            image_rect_vertices: upload_static_buffer(
                allocator,
                "image rect vertices",
                BufferUsages::VERTEX,
                bytemuck::cast_slice(&IMAGE_RECT_VERTICES),
            )?,
            image_rect_indices: upload_static_buffer(
                allocator,
                "image rect indices",
                BufferUsages::INDEX,
                bytemuck::cast_slice(&IMAGE_RECT_INDICES),
            )?,
        })
    }
}

const GRADIENT_TEXTURE_USAGE: TextureUsages = TextureUsages::COLOR_ATTACHMENT
    .union(TextureUsages::SAMPLED)
    .union(TextureUsages::TRANSFER_DST);
const TESSELLATION_TEXTURE_USAGE: TextureUsages =
    TextureUsages::COLOR_ATTACHMENT.union(TextureUsages::SAMPLED);

/// Owns the GPU state shared by every flush: the flush buffer rings, the
/// auxiliary pipelines and their textures, and the draw pipeline caches.
///
/// Each frame, the caller resizes and fills the flush buffers between
/// [`RenderContext::prepare_to_map_buffers`] and [`RenderContext::flush`].
pub struct RenderContext<A: GpuResourceAllocator> {
    pub(crate) resources: GpuResources<A>,
    pub(crate) features: DeviceFeatures,
    platform_features: PlatformFeatures,
    pub(crate) flush_buffers: [BufferRing; FlushBufferKind::COUNT],
    pub(crate) buffer_ring_index: usize,
    pub(crate) frame_completion_fences: [Option<Arc<dyn CompletionFence>>; BUFFER_RING_SIZE],
    pub(crate) color_ramp_pipeline: ColorRampPipeline,
    pub(crate) tessellate_pipeline: TessellatePipeline,
    pub(crate) gradient_texture: RenderTexture,
    pub(crate) tessellation_texture: RenderTexture,
    pub(crate) static_buffers: StaticBuffers,
    pub(crate) linear_sampler: SamplerHandle,
    pub(crate) mipmap_sampler: SamplerHandle,
    pub(crate) null_image_texture: ImageTexture,
    pub(crate) draw_pipeline_layouts: [Option<DrawPipelineLayout>; DRAW_PIPELINE_LAYOUT_COUNT],
    pub(crate) draw_shaders: KeyedCache<DrawShader>,
    pub(crate) draw_pipelines: KeyedCache<DrawPipeline>,
    descriptor_pools: RecyclingPool<DescriptorPoolHandle>,
}

impl<A: GpuResourceAllocator> RenderContext<A> {
    /// Creates the context and the objects every flush uses.
    ///
    /// Fails with [`Error::PixelLocalStorageUnsupported`] if the device can't
    /// store from fragment shaders.
    pub fn new(allocator: A, features: DeviceFeatures) -> Result<Self> {
        if !features.fragment_stores_and_atomics {
            return Err(Error::PixelLocalStorageUnsupported);
        }
        let mut resources = GpuResources::new(allocator);
        let allocator = resources.allocator_mut();
        let color_ramp_pipeline = ColorRampPipeline::new(allocator)?;
        let tessellate_pipeline = TessellatePipeline::new(allocator)?;
        let gradient_texture = RenderTexture::new(
            allocator,
            &TextureDesc {
                label: "gradient",
                width: 1,
                height: 1,
                mip_level_count: 1,
                format: GRADIENT_TEXTURE_FORMAT,
                usage: GRADIENT_TEXTURE_USAGE,
            },
            color_ramp_pipeline.render_pass(),
        )?;
        let tessellation_texture = RenderTexture::new(
            allocator,
            &TextureDesc {
                label: "tessellation",
                width: 1,
                height: 1,
                mip_level_count: 1,
                format: TESSELLATION_TEXTURE_FORMAT,
                usage: TESSELLATION_TEXTURE_USAGE,
            },
            tessellate_pipeline.render_pass(),
        )?;
        let static_buffers = StaticBuffers::new(allocator)?;
        let linear_sampler = allocator.create_sampler(&SamplerDesc {
            label: "linear",
            filter: FilterMode::Linear,
            mipmap_filter: None,
            lod_max_clamp: 0.0,
        })?;
        let mipmap_sampler = allocator.create_sampler(&SamplerDesc {
            label: "mipmap",
            filter: FilterMode::Linear,
            mipmap_filter: Some(FilterMode::Linear),
            lod_max_clamp: 32.0,
        })?;
        let null_image_texture = ImageTexture::new(&mut resources, 1, 1, 1, &[0, 0, 0, 255])?;

        Ok(Self {
            resources,
            features,
            platform_features: PlatformFeatures::new(&features),
            flush_buffers: FlushBufferKind::ALL
                .map(|kind| BufferRing::with_usage(kind.label(), kind.usage())),
            // The first frame writes slot 0.
            buffer_ring_index: BUFFER_RING_SIZE - 1,
            frame_completion_fences: Default::default(),
            color_ramp_pipeline,
            tessellate_pipeline,
            gradient_texture,
            tessellation_texture,
            static_buffers,
            linear_sampler,
            mipmap_sampler,
            null_image_texture,
            draw_pipeline_layouts: Default::default(),
            draw_shaders: KeyedCache::new(),
            draw_pipelines: KeyedCache::new(),
            descriptor_pools: RecyclingPool::new(descriptor_limits::MAX_RECYCLED_POOLS),
        })
    }

    pub fn device_features(&self) -> &DeviceFeatures {
        &self.features
    }

    pub fn platform_features(&self) -> &PlatformFeatures {
        &self.platform_features
    }

    pub fn resources(&self) -> &GpuResources<A> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut GpuResources<A> {
        &mut self.resources
    }

    pub fn allocator(&self) -> &A {
        self.resources.allocator()
    }

    /// The ring slot the current frame writes.
    pub fn buffer_ring_index(&self) -> usize {
        self.buffer_ring_index
    }

    /// Sets the size the flush buffer of `kind` must have from the next
    /// [`RenderContext::prepare_to_map_buffers`] on.
    pub fn resize_flush_buffer(&mut self, kind: FlushBufferKind, size_in_bytes: u64) {
        self.flush_buffers[kind.index()].set_target_size(size_in_bytes);
    }

    /// Starts a new frame.
    ///
    /// Waits until the GPU is done with the ring slot this frame writes, then
    /// destroys retired resources that have expired and grows the slot's
    /// flush buffers to their requested sizes.
    pub fn prepare_to_map_buffers(&mut self) -> Result<()> {
        self.resources.advance_frame();
        self.buffer_ring_index = (self.buffer_ring_index + 1) % BUFFER_RING_SIZE;
        if let Some(fence) = self.frame_completion_fences[self.buffer_ring_index].take() {
            fence.wait();
        }
        let destroyed = self.resources.collect();
        if destroyed > 0 {
            log::trace!("destroyed {destroyed} retired resources");
        }
        for ring in &mut self.flush_buffers {
            ring.synchronize_size_at(self.buffer_ring_index, &mut self.resources)?;
        }
        Ok(())
    }

    /// The writable contents of the current slot of a flush buffer.
    pub fn map_flush_buffer(&mut self, kind: FlushBufferKind) -> Result<&mut [u8]> {
        self.flush_buffers[kind.index()]
            .contents_at(self.buffer_ring_index, self.resources.allocator_mut())
    }

    /// Writes `data` into the current slot of a flush buffer, starting at
    /// element `first_element`.
    pub fn write_flush_buffer<T: Pod>(
        &mut self,
        kind: FlushBufferKind,
        first_element: usize,
        data: &[T],
    ) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let start = first_element.checked_mul(size_of::<T>());
        let end = start.and_then(|start| start.checked_add(bytes.len()));
        let contents = self.map_flush_buffer(kind)?;
        match (start, end) {
            (Some(start), Some(end)) if end <= contents.len() => {
                contents[start..end].copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(Error::WriteOutOfBounds {
                label: kind.label(),
                // Saturates when the offset itself overflows.
                end: end.map_or(u64::MAX, |end| end as u64),
                size: contents.len() as u64,
            }),
        }
    }

    /// Makes the writes to a flush buffer visible to the GPU.
    pub fn unmap_flush_buffer(&mut self, kind: FlushBufferKind) -> Result<()> {
        self.flush_buffers[kind.index()]
            .flush_mapped_contents_at(self.buffer_ring_index, self.resources.allocator_mut())
    }

    pub(crate) fn flush_buffer(&self, kind: FlushBufferKind) -> Result<BufferHandle> {
        self.flush_buffers[kind.index()].buffer_at(self.buffer_ring_index)
    }

    /// Binds the current slot of a flush buffer from `offset` to its end.
    pub(crate) fn flush_buffer_binding(
        &self,
        kind: FlushBufferKind,
        offset: u64,
    ) -> Result<BufferBinding> {
        self.flush_buffers[kind.index()].binding_at(self.buffer_ring_index, offset)
    }

    pub fn gradient_texture_size(&self) -> (u32, u32) {
        (self.gradient_texture.width, self.gradient_texture.height)
    }

    pub fn tessellation_texture_size(&self) -> (u32, u32) {
        (
            self.tessellation_texture.width,
            self.tessellation_texture.height,
        )
    }

    /// Replaces the gradient texture if its size changes.
    pub fn resize_gradient_texture(&mut self, width: u32, height: u32) -> Result<()> {
        let (width, height) = (width.max(1), height.max(1));
        if self.gradient_texture_size() == (width, height) {
            return Ok(());
        }
        let replacement = RenderTexture::new(
            self.resources.allocator_mut(),
            &TextureDesc {
                label: "gradient",
                width,
                height,
                mip_level_count: 1,
                format: GRADIENT_TEXTURE_FORMAT,
                usage: GRADIENT_TEXTURE_USAGE,
            },
            self.color_ramp_pipeline.render_pass(),
        )?;
        std::mem::replace(&mut self.gradient_texture, replacement).retire(&mut self.resources);
        log::debug!("resized gradient texture to {width}x{height}");
        Ok(())
    }

    /// Replaces the tessellation texture if its size changes.
    pub fn resize_tessellation_texture(&mut self, width: u32, height: u32) -> Result<()> {
        let (width, height) = (width.max(1), height.max(1));
        if self.tessellation_texture_size() == (width, height) {
            return Ok(());
        }
        let replacement = RenderTexture::new(
            self.resources.allocator_mut(),
            &TextureDesc {
                label: "tessellation",
                width,
                height,
                mip_level_count: 1,
                format: TESSELLATION_TEXTURE_FORMAT,
                usage: TESSELLATION_TEXTURE_USAGE,
            },
            self.tessellate_pipeline.render_pass(),
        )?;
        std::mem::replace(&mut self.tessellation_texture, replacement)
            .retire(&mut self.resources);
        log::debug!("resized tessellation texture to {width}x{height}");
        Ok(())
    }

    /// Creates an image texture from RGBA8 pixels, with a full mip chain.
    ///
    /// The pixels are uploaded by the first flush that draws the image.
    pub fn make_image_texture(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<ImageTexture> {
        ImageTexture::new(
            &mut self.resources,
            width,
            height,
            mip_level_count(width, height),
            rgba,
        )
    }

    /// Decodes an encoded image and creates a texture from it.
    ///
    /// Returns `Ok(None)` if the bytes can't be decoded.
    #[cfg(feature = "decoders")]
    pub fn decode_image_texture(&mut self, encoded: &[u8]) -> Result<Option<ImageTexture>> {
        match crate::texture::decode_rgba(encoded) {
            Some((width, height, rgba)) => self.make_image_texture(width, height, &rgba).map(Some),
            None => Ok(None),
        }
    }

    /// Destroys an image texture once in-flight frames are done with it.
    pub fn retire_image_texture(&mut self, image: ImageTexture) {
        image.release(&mut self.resources);
    }

    pub fn make_render_buffer(&self, kind: RenderBufferKind, size_in_bytes: u64) -> RenderBuffer {
        RenderBuffer::new(kind, size_in_bytes)
    }

    /// Moves to the render buffer's next slot and returns its contents.
    pub fn map_render_buffer<'a>(&'a mut self, buffer: &mut RenderBuffer) -> Result<&'a mut [u8]> {
        buffer.map(&mut self.resources)
    }

    pub fn unmap_render_buffer(&mut self, buffer: &RenderBuffer) -> Result<()> {
        buffer.unmap(&mut self.resources)
    }

    pub fn retire_render_buffer(&mut self, buffer: RenderBuffer) {
        buffer.release(&mut self.resources);
    }

    /// Destroys the attachments a render target created once in-flight
    /// frames are done with them.
    pub fn retire_render_target(&mut self, target: &RenderTarget) {
        target.release_attachments(&mut self.resources);
    }

    /// A descriptor pool for one flush, recycled if an expired one is available.
    pub(crate) fn acquire_descriptor_pool(&mut self) -> Result<DescriptorPoolHandle> {
        let frame = self.resources.current_frame();
        let allocator = self.resources.allocator_mut();
        if let Some(pool) = self.descriptor_pools.check_out(frame) {
            allocator.reset_descriptor_pool(pool)?;
            return Ok(pool);
        }
        allocator.create_descriptor_pool(&flush_descriptor_pool_desc())
    }

    /// Hands a flush's descriptor pool back for reuse, or retires it if the
    /// recycling pool is full.
    pub(crate) fn release_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let frame = self.resources.current_frame();
        if let Some(pool) = self.descriptor_pools.check_in(pool, frame) {
            self.resources.retire(Resource::DescriptorPool(pool));
        }
    }

    /// Number of descriptor pools waiting to be reused.
    pub fn recycled_descriptor_pool_count(&self) -> usize {
        self.descriptor_pools.len()
    }

    /// Number of draw pipelines built so far.
    pub fn draw_pipeline_count(&self) -> usize {
        self.draw_pipelines.len()
    }

    /// Number of draw shaders built so far.
    pub fn draw_shader_count(&self) -> usize {
        self.draw_shaders.len()
    }
}

impl<A: GpuResourceAllocator> Drop for RenderContext<A> {
    fn drop(&mut self) {
        for fence in self.frame_completion_fences.iter().flatten() {
            fence.wait();
        }
        for pool in self.descriptor_pools.drain() {
            self.resources.retire(Resource::DescriptorPool(pool));
        }
        for pipeline in self.draw_pipelines.drain() {
            self.resources.retire(Resource::Pipeline(pipeline.handle));
        }
        for shader in self.draw_shaders.drain() {
            self.resources.retire(Resource::ShaderModule(shader.vertex));
            self.resources.retire(Resource::ShaderModule(shader.fragment));
        }
        for layout in self.draw_pipeline_layouts.iter_mut().filter_map(Option::take) {
            layout.release(&mut self.resources);
        }
        self.resources.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ResourceKind;
    use crate::{HostAllocator, HostFence};

    fn context() -> RenderContext<HostAllocator> {
        RenderContext::new(HostAllocator::new(), DeviceFeatures::all()).unwrap()
    }

    #[test]
    fn pixel_local_storage_is_required() {
        let features = DeviceFeatures {
            fragment_stores_and_atomics: false,
            ..DeviceFeatures::all()
        };
        assert!(matches!(
            RenderContext::new(HostAllocator::new(), features),
            Err(Error::PixelLocalStorageUnsupported)
        ));
    }

    #[test]
    fn platform_features_follow_the_device() {
        let features = DeviceFeatures {
            rasterization_order_color_attachment_access: false,
            ..DeviceFeatures::all()
        };
        let context = RenderContext::new(HostAllocator::new(), features).unwrap();
        let platform = context.platform_features();
        assert!(platform.supports_pixel_local_storage);
        assert!(!platform.supports_raster_ordering);
        assert!(platform.uninvert_on_screen_y);
    }

    #[test]
    fn flush_buffers_round_trip() {
        let mut context = context();
        context.resize_flush_buffer(FlushBufferKind::Path, 64);
        context.prepare_to_map_buffers().unwrap();
        let words: [u32; 4] = [1, 2, 3, 4];
        context
            .write_flush_buffer(FlushBufferKind::Path, 2, &words)
            .unwrap();
        context.unmap_flush_buffer(FlushBufferKind::Path).unwrap();
        let buffer = context.flush_buffer(FlushBufferKind::Path).unwrap();
        let contents = context.allocator().read_buffer(buffer).unwrap();
        let written: &[u32] = bytemuck::cast_slice(&contents[8..24]);
        assert_eq!(written, words);
    }

    #[test]
    fn writes_past_the_slot_are_rejected() {
        let mut context = context();
        context.resize_flush_buffer(FlushBufferKind::Paint, 16);
        context.prepare_to_map_buffers().unwrap();
        assert!(matches!(
            context.write_flush_buffer(FlushBufferKind::Paint, 3, &[0_u32; 2]),
            Err(Error::WriteOutOfBounds {
                label: "paints",
                end: 20,
                size: 16,
            })
        ));
    }

    #[test]
    fn overflowing_element_offsets_are_rejected() {
        let mut context = context();
        context.resize_flush_buffer(FlushBufferKind::Paint, 16);
        context.prepare_to_map_buffers().unwrap();
        assert!(matches!(
            context.write_flush_buffer(FlushBufferKind::Paint, usize::MAX / 2, &[0_u32; 1]),
            Err(Error::WriteOutOfBounds {
                label: "paints",
                end: u64::MAX,
                size: 16,
            })
        ));
    }

    #[test]
    fn slots_rotate_through_the_ring() {
        let mut context = context();
        let mut slots = Vec::new();
        for _ in 0..BUFFER_RING_SIZE + 1 {
            context.prepare_to_map_buffers().unwrap();
            slots.push(context.buffer_ring_index());
        }
        assert_eq!(slots, [0, 1, 2, 0]);
    }

    #[test]
    fn reusing_a_slot_waits_on_its_fence() {
        let mut context = context();
        context.prepare_to_map_buffers().unwrap();
        let fence = Arc::new(HostFence::new());
        context.frame_completion_fences[context.buffer_ring_index()] = Some(fence.clone());
        for _ in 0..BUFFER_RING_SIZE - 1 {
            context.prepare_to_map_buffers().unwrap();
            assert_eq!(fence.wait_count(), 0);
        }
        context.prepare_to_map_buffers().unwrap();
        assert_eq!(fence.wait_count(), 1);
    }

    #[test]
    fn resizing_retires_the_old_gradient_texture() {
        let mut context = context();
        let old = context.gradient_texture.texture;
        context.resize_gradient_texture(512, 0).unwrap();
        // A zero height is clamped, so the size is unchanged.
        assert_eq!(context.gradient_texture.texture, old);
        context.resize_gradient_texture(512, 8).unwrap();
        assert_eq!(context.gradient_texture_size(), (512, 8));
        assert!(context.allocator().is_live(old.0));
        for _ in 0..BUFFER_RING_SIZE {
            context.prepare_to_map_buffers().unwrap();
        }
        assert!(!context.allocator().is_live(old.0));
        assert_eq!(context.allocator().live_count(ResourceKind::Texture), 3);
    }

    #[test]
    fn descriptor_pools_are_recycled_after_expiring() {
        let mut context = context();
        context.prepare_to_map_buffers().unwrap();
        let pool = context.acquire_descriptor_pool().unwrap();
        context.release_descriptor_pool(pool);
        assert_eq!(context.recycled_descriptor_pool_count(), 1);
        context.prepare_to_map_buffers().unwrap();
        assert_ne!(context.acquire_descriptor_pool().unwrap(), pool);
        for _ in 0..BUFFER_RING_SIZE - 1 {
            context.prepare_to_map_buffers().unwrap();
        }
        assert_eq!(context.acquire_descriptor_pool().unwrap(), pool);
        assert_eq!(context.allocator().descriptor_pool_reset_count(pool), 1);
    }
}
