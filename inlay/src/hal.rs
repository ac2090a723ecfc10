// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The hardware abstraction the renderer is written against.
//!
//! A backend implements [`GpuResourceAllocator`] to create and destroy GPU
//! objects. Everything else the renderer does to the GPU goes through a
//! [`Recording`](crate::Recording), which the embedder executes and submits.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use inlay_encoding::InterlockMode;
use smallvec::SmallVec;

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub NonZeroU64);

impl ResourceId {
    pub fn next() -> Self {
        // We initialize with 1 so that the conversion below always succeeds.
        static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}

macro_rules! handles {
    ($($(#[$meta:meta])* $name:ident,)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub ResourceId);

            impl $name {
                pub fn next() -> Self {
                    Self(ResourceId::next())
                }
            }
        )*
    };
}

handles! {
    BufferHandle,
    TextureHandle,
    TextureViewHandle,
    SamplerHandle,
    ShaderModuleHandle,
    DescriptorSetLayoutHandle,
    PipelineLayoutHandle,
    RenderPassHandle,
    PipelineHandle,
    FramebufferHandle,
    DescriptorPoolHandle,
    /// Descriptor sets are owned by their pool and released when it is reset
    /// or destroyed.
    DescriptorSetHandle,
}

/// Any GPU object that can be destroyed on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    ShaderModule(ShaderModuleHandle),
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    PipelineLayout(PipelineLayoutHandle),
    RenderPass(RenderPassHandle),
    Pipeline(PipelineHandle),
    Framebuffer(FramebufferHandle),
    DescriptorPool(DescriptorPoolHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    TextureView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    RenderPass,
    Pipeline,
    Framebuffer,
    DescriptorPool,
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Buffer(h) => h.0,
            Self::Texture(h) => h.0,
            Self::TextureView(h) => h.0,
            Self::Sampler(h) => h.0,
            Self::ShaderModule(h) => h.0,
            Self::DescriptorSetLayout(h) => h.0,
            Self::PipelineLayout(h) => h.0,
            Self::RenderPass(h) => h.0,
            Self::Pipeline(h) => h.0,
            Self::Framebuffer(h) => h.0,
            Self::DescriptorPool(h) => h.0,
        }
    }

    pub fn kind(&self) -> ResourceKind {
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

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const INPUT_ATTACHMENT = 1 << 1;
        /// Contents never need to leave tile memory.
        const TRANSIENT_ATTACHMENT = 1 << 2;
        const SAMPLED = 1 << 3;
        const STORAGE = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TRANSFER = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 3;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const COLOR_ATTACHMENT_WRITE = 1 << 0;
        const INPUT_ATTACHMENT_READ = 1 << 1;
        const SHADER_READ = 1 << 2;
        const TRANSFER_READ = 1 << 3;
        const TRANSFER_WRITE = 1 << 4;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    R32Uint,
    Rgba32Uint,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Uint => 4,
            Self::Rgba32Uint => 16,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsages,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

impl TextureDesc {
    /// Bytes occupied by every mip level together.
    pub fn size_in_bytes(&self) -> u64 {
        let texel = u64::from(self.format.bytes_per_texel());
        (0..self.mip_level_count)
            .map(|level| {
                let w = u64::from((self.width >> level).max(1));
                let h = u64::from((self.height >> level).max(1));
                w * h * texel
            })
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDesc {
    pub label: &'static str,
    pub filter: FilterMode,
    /// `None` samples only the base level.
    pub mipmap_filter: Option<FilterMode>,
    pub lod_max_clamp: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// The precompiled shader programs a backend must provide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    ColorRamp,
    Tessellate,
    DrawPath,
    DrawInteriorTriangles,
    DrawImageRect,
    DrawImageMesh,
    DrawAtomicResolve,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderModuleDesc {
    pub program: ShaderProgram,
    pub stage: ShaderStage,
    /// Draw shaders are compiled per interlock mode; auxiliary passes have none.
    pub interlock_mode: Option<InterlockMode>,
    /// Selects the fragment variant that writes color through fixed-function blending.
    pub fixed_function_color_blend: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    SampledImage,
    Sampler,
    StorageBuffer,
    UniformBuffer,
    DynamicUniformBuffer,
    InputAttachment,
    StorageImage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutEntry {
    pub binding: u32,
    pub ty: DescriptorType,
    pub stages: ShaderStages,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub label: &'static str,
    pub entries: SmallVec<[DescriptorSetLayoutEntry; 8]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    pub label: &'static str,
    pub set_layouts: SmallVec<[DescriptorSetLayoutHandle; 4]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Layout the attachment is in before and after the pass.
    pub layout: ImageLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    /// Only orders accesses to the same pixel.
    pub by_region: bool,
}

impl MemoryBarrier {
    /// Makes color writes of earlier draws visible to input attachment reads of later ones.
    pub const COLOR_WRITE_TO_INPUT_READ: Self = Self {
        src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        dst_stages: PipelineStages::FRAGMENT_SHADER,
        src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: AccessFlags::INPUT_ATTACHMENT_READ,
        by_region: true,
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub label: &'static str,
    pub attachments: SmallVec<[AttachmentDesc; 4]>,
    /// Attachment index per color output location, `None` when unused.
    pub color_attachments: SmallVec<[Option<u32>; 4]>,
    /// Attachment index per input attachment binding, `None` when unused.
    pub input_attachments: SmallVec<[Option<u32>; 4]>,
    pub raster_order_attachment_access: bool,
    pub self_dependency: Option<MemoryBarrier>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32x4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub binding: u32,
    pub stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: SmallVec<[VertexAttribute; 4]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    One,
    OneMinusSrcAlpha,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendState {
    pub const PREMULTIPLIED_ALPHA: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub label: &'static str,
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub vertex_module: ShaderModuleHandle,
    pub fragment_module: ShaderModuleHandle,
    /// Boolean specialization constants, by constant id.
    pub specialization: SmallVec<[bool; 6]>,
    pub vertex_buffers: SmallVec<[VertexBufferLayout; 2]>,
    pub topology: PrimitiveTopology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    /// Blending per color output location, `None` to write unblended.
    pub color_targets: SmallVec<[Option<BlendState>; 4]>,
    pub raster_order_attachment_access: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub label: &'static str,
    pub render_pass: RenderPassHandle,
    pub attachments: SmallVec<[TextureViewHandle; 4]>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    pub label: &'static str,
    pub max_sets: u32,
    pub sizes: SmallVec<[(DescriptorType, u32); 8]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Texture {
        view: TextureViewHandle,
        layout: ImageLayout,
    },
    Sampler(SamplerHandle),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

impl DescriptorWrite {
    pub fn buffer(
        binding: u32,
        ty: DescriptorType,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Self {
        Self {
            binding,
            ty,
            resource: DescriptorResource::Buffer {
                buffer,
                offset,
                size,
            },
        }
    }

    pub fn texture(
        binding: u32,
        ty: DescriptorType,
        view: TextureViewHandle,
        layout: ImageLayout,
    ) -> Self {
        Self {
            binding,
            ty,
            resource: DescriptorResource::Texture { view, layout },
        }
    }

    pub fn sampler(binding: u32, sampler: SamplerHandle) -> Self {
        Self {
            binding,
            ty: DescriptorType::Sampler,
            resource: DescriptorResource::Sampler(sampler),
        }
    }
}

/// Creates and destroys GPU objects for one device.
///
/// Creation failures are returned as errors and are not retried by the
/// renderer. Destruction is only requested once no submitted command can
/// still reference the object.
pub trait GpuResourceAllocator {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;
    /// Host-visible contents of a buffer, valid until [`Self::flush_mapped_buffer`].
    fn buffer_contents(&mut self, buffer: BufferHandle) -> Result<&mut [u8]>;
    /// Makes CPU writes to the buffer's contents visible to the GPU.
    fn flush_mapped_buffer(&mut self, buffer: BufferHandle) -> Result<()>;
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;
    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<TextureViewHandle>;
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle>;
    fn create_shader_module(&mut self, desc: &ShaderModuleDesc) -> Result<ShaderModuleHandle>;
    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> Result<DescriptorSetLayoutHandle>;
    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> Result<PipelineLayoutHandle>;
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassHandle>;
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle>;
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle>;
    fn create_descriptor_pool(&mut self, desc: &DescriptorPoolDesc) -> Result<DescriptorPoolHandle>;
    /// Releases every descriptor set allocated from `pool`.
    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolHandle) -> Result<()>;
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle>;
    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<()>;
    fn destroy(&mut self, resource: Resource);
}

/// Signals when the GPU has finished the work submitted before it.
pub trait CompletionFence: Send + Sync {
    /// Blocks until the fence is signaled.
    fn wait(&self);
    fn is_signaled(&self) -> bool;
}
