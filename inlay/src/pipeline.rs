// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lazily built draw pipelines and the layouts they share.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use inlay_encoding::{
    binding, descriptor_limits, plane, render_pass_variant_parts, set, DrawType, ImageRectVertex,
    InterlockMode, LoadAction, PatchVertex, ShaderFeatures, TriangleVertex,
    RENDER_PASS_VARIANT_COUNT,
};
use smallvec::{smallvec, SmallVec};

use crate::hal::{
    AttachmentDesc, BlendState, CullMode, DescriptorPoolDesc, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutEntry,
    DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite, FrontFace, GpuResourceAllocator,
    GraphicsPipelineDesc, ImageLayout, LoadOp, MemoryBarrier, PipelineHandle, PipelineLayoutDesc,
    PipelineLayoutHandle, PolygonMode, PrimitiveTopology, RenderPassDesc, RenderPassHandle,
    Resource, SamplerHandle, ShaderModuleDesc, ShaderModuleHandle, ShaderProgram, ShaderStage,
    ShaderStages, StoreOp, TextureFormat, TextureViewHandle, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexStepMode,
};
use crate::purgatory::GpuResources;
use crate::{Error, Result};

/// A map from packed keys to GPU objects that are built on first use and
/// kept for the lifetime of the context.
pub(crate) struct KeyedCache<V> {
    entries: HashMap<u32, V>,
}

impl<V> KeyedCache<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the entry for `key`, building it with `build` if it is missing.
    ///
    /// A failed build leaves the cache unchanged.
    pub(crate) fn get_or_try_insert_with(
        &mut self,
        key: u32,
        build: impl FnOnce() -> Result<V>,
    ) -> Result<&V> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let value = build()?;
                Ok(entry.insert(value))
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = V> + '_ {
        self.entries.drain().map(|(_, value)| value)
    }
}

/// Options that change the shape of a [`DrawPipelineLayout`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct DrawPipelineLayoutOptions {
    /// Color is written by fixed-function blending instead of through pixel
    /// local storage, so the color plane isn't an input attachment.
    pub fixed_function_color_blend: bool,
}

/// Index of the layout for an interlock mode and option set.
pub(crate) fn draw_pipeline_layout_index(
    interlock_mode: InterlockMode,
    options: DrawPipelineLayoutOptions,
) -> usize {
    let atomics = interlock_mode == InterlockMode::Atomics;
    (usize::from(atomics) << 1) | usize::from(options.fixed_function_color_blend)
}

pub(crate) const DRAW_PIPELINE_LAYOUT_COUNT: usize = 4;

/// Descriptor set and pipeline layouts shared by every draw pipeline of one
/// interlock mode, along with the sets that never change.
pub(crate) struct DrawPipelineLayout {
    interlock_mode: InterlockMode,
    options: DrawPipelineLayoutOptions,
    set_layouts: [DescriptorSetLayoutHandle; set::COUNT],
    pipeline_layout: PipelineLayoutHandle,
    null_image_set: DescriptorSetHandle,
    sampler_set: DescriptorSetHandle,
    /// Owns the null image and sampler sets.
    static_descriptor_pool: DescriptorPoolHandle,
    render_passes: [Option<RenderPassHandle>; RENDER_PASS_VARIANT_COUNT],
}

impl DrawPipelineLayout {
    /// `null_image` is bound in place of an image texture by draws that don't
    /// sample one.
    pub(crate) fn new<A: GpuResourceAllocator>(
        allocator: &mut A,
        interlock_mode: InterlockMode,
        options: DrawPipelineLayoutOptions,
        null_image: TextureViewHandle,
        linear_sampler: SamplerHandle,
        mipmap_sampler: SamplerHandle,
    ) -> Result<Self> {
        let atomics = interlock_mode == InterlockMode::Atomics;
        let entry = |binding, ty, stages| DescriptorSetLayoutEntry {
            binding,
            ty,
            stages,
        };
        // Atomic mode resolves paint in the fragment shader.
        let paint_stages = if atomics {
            ShaderStages::FRAGMENT
        } else {
            ShaderStages::VERTEX
        };
        let per_flush = allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
            label: "per flush",
            entries: smallvec![
                entry(
                    binding::TESS_VERTEX_TEXTURE,
                    DescriptorType::SampledImage,
                    ShaderStages::VERTEX
                ),
                entry(
                    binding::GRAD_TEXTURE,
                    DescriptorType::SampledImage,
                    ShaderStages::FRAGMENT
                ),
                entry(
                    binding::PATH_BUFFER,
                    DescriptorType::StorageBuffer,
                    ShaderStages::VERTEX
                ),
                entry(binding::PAINT_BUFFER, DescriptorType::StorageBuffer, paint_stages),
                entry(
                    binding::PAINT_AUX_BUFFER,
                    DescriptorType::StorageBuffer,
                    paint_stages
                ),
                entry(
                    binding::CONTOUR_BUFFER,
                    DescriptorType::StorageBuffer,
                    ShaderStages::VERTEX
                ),
                entry(
                    binding::FLUSH_UNIFORM_BUFFER,
                    DescriptorType::UniformBuffer,
                    ShaderStages::VERTEX
                ),
                entry(
                    binding::IMAGE_DRAW_UNIFORM_BUFFER,
                    DescriptorType::DynamicUniformBuffer,
                    ShaderStages::VERTEX | ShaderStages::FRAGMENT
                ),
            ],
        })?;
        let per_draw = allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
            label: "per draw",
            entries: smallvec![entry(
                binding::IMAGE_TEXTURE,
                DescriptorType::SampledImage,
                ShaderStages::FRAGMENT
            )],
        })?;
        let samplers = allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
            label: "samplers",
            entries: smallvec![
                entry(
                    binding::GRAD_TEXTURE,
                    DescriptorType::Sampler,
                    ShaderStages::FRAGMENT
                ),
                entry(
                    binding::IMAGE_TEXTURE,
                    DescriptorType::Sampler,
                    ShaderStages::FRAGMENT
                ),
            ],
        })?;

        let mut pls_entries = SmallVec::new();
        if !options.fixed_function_color_blend {
            pls_entries.push(entry(
                plane::COLOR,
                DescriptorType::InputAttachment,
                ShaderStages::FRAGMENT,
            ));
        }
        pls_entries.push(entry(
            plane::CLIP,
            DescriptorType::InputAttachment,
            ShaderStages::FRAGMENT,
        ));
        if atomics {
            pls_entries.push(entry(
                plane::COVERAGE,
                DescriptorType::StorageImage,
                ShaderStages::FRAGMENT,
            ));
        } else {
            pls_entries.push(entry(
                plane::SCRATCH_COLOR,
                DescriptorType::InputAttachment,
                ShaderStages::FRAGMENT,
            ));
            pls_entries.push(entry(
                plane::COVERAGE,
                DescriptorType::InputAttachment,
                ShaderStages::FRAGMENT,
            ));
        }
        let pls = allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
            label: "pixel local storage",
            entries: pls_entries,
        })?;

        let mut set_layouts = [per_flush; set::COUNT];
        set_layouts[set::PER_DRAW as usize] = per_draw;
        set_layouts[set::SAMPLER as usize] = samplers;
        set_layouts[set::PLS_TEXTURE as usize] = pls;
        let pipeline_layout = allocator.create_pipeline_layout(&PipelineLayoutDesc {
            label: "draw",
            set_layouts: set_layouts.into_iter().collect(),
        })?;

        let static_descriptor_pool = allocator.create_descriptor_pool(&DescriptorPoolDesc {
            label: "static draw sets",
            max_sets: 2,
            sizes: smallvec![(DescriptorType::SampledImage, 1), (DescriptorType::Sampler, 2)],
        })?;
        let null_image_set = allocator.allocate_descriptor_set(static_descriptor_pool, per_draw)?;
        allocator.write_descriptor_set(
            null_image_set,
            &[DescriptorWrite::texture(
                binding::IMAGE_TEXTURE,
                DescriptorType::SampledImage,
                null_image,
                ImageLayout::ShaderReadOnly,
            )],
        )?;
        let sampler_set = allocator.allocate_descriptor_set(static_descriptor_pool, samplers)?;
        allocator.write_descriptor_set(
            sampler_set,
            &[
                DescriptorWrite::sampler(binding::GRAD_TEXTURE, linear_sampler),
                DescriptorWrite::sampler(binding::IMAGE_TEXTURE, mipmap_sampler),
            ],
        )?;

        Ok(Self {
            interlock_mode,
            options,
            set_layouts,
            pipeline_layout,
            null_image_set,
            sampler_set,
            static_descriptor_pool,
            render_passes: [None; RENDER_PASS_VARIANT_COUNT],
        })
    }

    /// Retires every object the layout created, including its render passes.
    pub(crate) fn release<A: GpuResourceAllocator>(self, resources: &mut GpuResources<A>) {
        for render_pass in self.render_passes.into_iter().flatten() {
            resources.retire(Resource::RenderPass(render_pass));
        }
        resources.retire(Resource::PipelineLayout(self.pipeline_layout));
        for set_layout in self.set_layouts {
            resources.retire(Resource::DescriptorSetLayout(set_layout));
        }
        resources.retire(Resource::DescriptorPool(self.static_descriptor_pool));
    }

    /// Number of pixel-local-storage planes attached to the render pass.
    pub(crate) fn pls_attachment_count(&self) -> usize {
        match self.interlock_mode {
            InterlockMode::Atomics => 2,
            _ => 4,
        }
    }

    pub(crate) fn set_layout(&self, set: u32) -> DescriptorSetLayoutHandle {
        self.set_layouts[set as usize]
    }

    pub(crate) fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout
    }

    pub(crate) fn null_image_set(&self) -> DescriptorSetHandle {
        self.null_image_set
    }

    pub(crate) fn sampler_set(&self) -> DescriptorSetHandle {
        self.sampler_set
    }

    /// The render pass for a load action and framebuffer format, created on first use.
    pub(crate) fn render_pass_at<A: GpuResourceAllocator>(
        &mut self,
        allocator: &mut A,
        variant: usize,
    ) -> Result<RenderPassHandle> {
        if let Some(render_pass) = self.render_passes[variant] {
            return Ok(render_pass);
        }
        let render_pass = allocator.create_render_pass(&self.render_pass_desc(variant))?;
        self.render_passes[variant] = Some(render_pass);
        Ok(render_pass)
    }

    pub(crate) fn render_pass_desc(&self, variant: usize) -> RenderPassDesc {
        let (load_action, is_bgra) = render_pass_variant_parts(variant);
        let atomics = self.interlock_mode == InterlockMode::Atomics;
        let format = if is_bgra {
            TextureFormat::Bgra8Unorm
        } else {
            TextureFormat::Rgba8Unorm
        };
        let color_load_op = match load_action {
            LoadAction::Clear => LoadOp::Clear,
            LoadAction::PreserveRenderTarget => LoadOp::Load,
            LoadAction::DontCare => LoadOp::DontCare,
        };
        let attachment = |format, load_op, store_op| AttachmentDesc {
            format,
            load_op,
            store_op,
            layout: ImageLayout::General,
        };

        let mut attachments: SmallVec<[AttachmentDesc; 4]> = smallvec![
            attachment(format, color_load_op, StoreOp::Store),
            attachment(TextureFormat::R32Uint, LoadOp::Clear, StoreOp::DontCare),
        ];
        if !atomics {
            attachments.push(attachment(
                TextureFormat::Rgba8Unorm,
                LoadOp::DontCare,
                StoreOp::DontCare,
            ));
            attachments.push(attachment(
                TextureFormat::R32Uint,
                LoadOp::Clear,
                StoreOp::DontCare,
            ));
        }
        let color_attachments = (0..attachments.len() as u32).map(Some).collect();
        let mut input_attachments: SmallVec<[Option<u32>; 4]> =
            (0..attachments.len() as u32).map(Some).collect();
        if self.options.fixed_function_color_blend {
            input_attachments[plane::COLOR as usize] = None;
        }

        RenderPassDesc {
            label: "draw",
            attachments,
            color_attachments,
            input_attachments,
            raster_order_attachment_access: self.interlock_mode == InterlockMode::RasterOrdering,
            // Atomic mode makes earlier draws visible with explicit barriers.
            self_dependency: atomics.then_some(MemoryBarrier::COLOR_WRITE_TO_INPUT_READ),
        }
    }
}

/// The shader program that implements `draw_type` in `interlock_mode`.
pub(crate) fn draw_program(
    draw_type: DrawType,
    interlock_mode: InterlockMode,
) -> Result<ShaderProgram> {
    let invalid = Error::InvalidDrawType {
        draw_type,
        interlock_mode,
    };
    match (interlock_mode, draw_type) {
        (InterlockMode::DepthStencil, _) => Err(invalid),
        (_, DrawType::MidpointFanPatches | DrawType::OuterCurvePatches) => {
            Ok(ShaderProgram::DrawPath)
        }
        (_, DrawType::InteriorTriangulation) => Ok(ShaderProgram::DrawInteriorTriangles),
        (_, DrawType::ImageMesh) => Ok(ShaderProgram::DrawImageMesh),
        (InterlockMode::Atomics, DrawType::ImageRect) => Ok(ShaderProgram::DrawImageRect),
        (InterlockMode::Atomics, DrawType::AtomicResolve) => Ok(ShaderProgram::DrawAtomicResolve),
        (InterlockMode::RasterOrdering, DrawType::ImageRect | DrawType::AtomicResolve) => {
            Err(invalid)
        }
    }
}

/// Vertex and fragment modules for one draw shader key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DrawShader {
    pub vertex: ShaderModuleHandle,
    pub fragment: ShaderModuleHandle,
}

impl DrawShader {
    pub(crate) fn new<A: GpuResourceAllocator>(
        allocator: &mut A,
        draw_type: DrawType,
        interlock_mode: InterlockMode,
        fixed_function_color_blend: bool,
    ) -> Result<Self> {
        let program = draw_program(draw_type, interlock_mode)?;
        let vertex = allocator.create_shader_module(&ShaderModuleDesc {
            program,
            stage: ShaderStage::Vertex,
            interlock_mode: Some(interlock_mode),
            fixed_function_color_blend: false,
        })?;
        let fragment = allocator.create_shader_module(&ShaderModuleDesc {
            program,
            stage: ShaderStage::Fragment,
            interlock_mode: Some(interlock_mode),
            fixed_function_color_blend,
        })?;
        Ok(Self { vertex, fragment })
    }
}

/// Everything a [`DrawPipeline`] is specialized on.
pub(crate) struct DrawPipelineParams {
    pub draw_type: DrawType,
    pub shader_features: ShaderFeatures,
    pub interlock_mode: InterlockMode,
    pub fixed_function_color_blend: bool,
    pub wireframe: bool,
    pub shader: DrawShader,
    pub pipeline_layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub pls_attachment_count: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DrawPipeline {
    pub handle: PipelineHandle,
}

fn vertex_buffers(draw_type: DrawType) -> SmallVec<[VertexBufferLayout; 2]> {
    let attribute = |location, format, offset| VertexAttribute {
        location,
        format,
        offset,
    };
    match draw_type {
        DrawType::MidpointFanPatches | DrawType::OuterCurvePatches => smallvec![VertexBufferLayout {
            binding: 0,
            stride: size_of::<PatchVertex>() as u32,
            step_mode: VertexStepMode::Vertex,
            attributes: smallvec![
                attribute(0, VertexFormat::Float32x4, 0),
                attribute(1, VertexFormat::Float32x4, 16),
            ],
        }],
        DrawType::InteriorTriangulation => smallvec![VertexBufferLayout {
            binding: 0,
            stride: size_of::<TriangleVertex>() as u32,
            step_mode: VertexStepMode::Vertex,
            attributes: smallvec![attribute(0, VertexFormat::Float32x3, 0)],
        }],
        DrawType::ImageRect => smallvec![VertexBufferLayout {
            binding: 0,
            stride: size_of::<ImageRectVertex>() as u32,
            step_mode: VertexStepMode::Vertex,
            attributes: smallvec![attribute(0, VertexFormat::Float32x4, 0)],
        }],
        DrawType::ImageMesh => smallvec![
            VertexBufferLayout {
                binding: 0,
                stride: 8,
                step_mode: VertexStepMode::Vertex,
                attributes: smallvec![attribute(0, VertexFormat::Float32x2, 0)],
            },
            VertexBufferLayout {
                binding: 1,
                stride: 8,
                step_mode: VertexStepMode::Vertex,
                attributes: smallvec![attribute(1, VertexFormat::Float32x2, 0)],
            },
        ],
        DrawType::AtomicResolve => smallvec![],
    }
}

impl DrawPipeline {
    pub(crate) fn new<A: GpuResourceAllocator>(
        allocator: &mut A,
        params: &DrawPipelineParams,
    ) -> Result<Self> {
        let blend = params
            .fixed_function_color_blend
            .then_some(BlendState::PREMULTIPLIED_ALPHA);
        let mut color_targets: SmallVec<[Option<BlendState>; 4]> =
            smallvec![None; params.pls_attachment_count];
        color_targets[plane::COLOR as usize] = blend;

        let handle = allocator.create_graphics_pipeline(&GraphicsPipelineDesc {
            label: "draw",
            layout: params.pipeline_layout,
            render_pass: params.render_pass,
            vertex_module: params.shader.vertex,
            fragment_module: params.shader.fragment,
            specialization: params.shader_features.to_array().into_iter().collect(),
            vertex_buffers: vertex_buffers(params.draw_type),
            topology: if params.draw_type == DrawType::AtomicResolve {
                PrimitiveTopology::TriangleStrip
            } else {
                PrimitiveTopology::TriangleList
            },
            polygon_mode: if params.wireframe {
                PolygonMode::Line
            } else {
                PolygonMode::Fill
            },
            cull_mode: if params.draw_type.is_image() {
                CullMode::None
            } else {
                CullMode::Back
            },
            front_face: FrontFace::Clockwise,
            color_targets,
            raster_order_attachment_access: params.interlock_mode
                == InterlockMode::RasterOrdering,
        })?;
        log::debug!(
            "built {:?} draw pipeline for {:?} interlock",
            params.draw_type,
            params.interlock_mode
        );
        Ok(Self { handle })
    }
}

/// Sizes of a descriptor pool that can serve one flush.
pub(crate) fn flush_descriptor_pool_desc() -> DescriptorPoolDesc {
    use descriptor_limits::*;
    DescriptorPoolDesc {
        label: "flush descriptors",
        max_sets: MAX_DESCRIPTOR_SETS,
        sizes: smallvec![
            (DescriptorType::UniformBuffer, MAX_UNIFORM_UPDATES),
            (DescriptorType::DynamicUniformBuffer, MAX_DYNAMIC_UNIFORM_UPDATES),
            (DescriptorType::SampledImage, MAX_SAMPLED_IMAGE_UPDATES),
            (DescriptorType::StorageBuffer, MAX_STORAGE_BUFFER_UPDATES),
            (DescriptorType::InputAttachment, MAX_INPUT_ATTACHMENT_UPDATES),
            (DescriptorType::StorageImage, MAX_STORAGE_IMAGE_UPDATES),
        ],
    }
}
