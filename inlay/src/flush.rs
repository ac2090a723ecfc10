// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording of one flush: auxiliary passes, uploads and the draw pass.

use std::sync::Arc;

use inlay_encoding::{
    binding, descriptor_limits, draw_pipeline_key, patch_base_index, patch_index_count, plane,
    render_pass_variant_index, set, shader_unique_key, ContourData, DrawType, FlushUniforms,
    ImageDrawUniforms, IntRect, InterlockMode, LoadAction, PaintAuxData, PaintData, PathData,
    ShaderFeatures, ShaderMiscFlags, GRAD_TEXTURE_WIDTH, IMAGE_RECT_INDICES,
};
use peniko::Color;
use smallvec::SmallVec;

use crate::color_ramp::ColorRampPass;
use crate::context::{FlushBufferKind, RenderContext};
use crate::hal::{
    CompletionFence, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorType, DescriptorWrite, FramebufferDesc, GpuResourceAllocator, ImageLayout,
    IndexFormat, MemoryBarrier, Resource, TextureFormat, TextureHandle, TextureUsages,
    TextureViewHandle,
};
use crate::pipeline::{
    draw_pipeline_layout_index, draw_program, DrawPipeline, DrawPipelineLayout,
    DrawPipelineLayoutOptions, DrawPipelineParams, DrawShader,
};
use crate::recording::{ClearValue, Command, Recording};
use crate::render_buffer::RenderBuffer;
use crate::render_target::{AttachmentRole, RenderTarget};
use crate::ring::{element_offset, BufferBinding};
use crate::tessellate::TessellatePass;
use crate::texture::ImageTexture;
use crate::{Error, Result};

/// The vertex, UV and index buffers of an image mesh.
#[derive(Copy, Clone)]
pub struct ImageMeshBuffers<'a> {
    pub vertices: &'a RenderBuffer,
    pub uvs: &'a RenderBuffer,
    pub indices: &'a RenderBuffer,
}

/// One draw call of a flush.
#[derive(Clone)]
pub struct DrawBatch<'a> {
    pub draw_type: DrawType,
    /// Instances for patches, vertices for triangles, indices for meshes.
    pub element_count: u32,
    pub base_element: u32,
    pub shader_features: ShaderFeatures,
    /// Later batches read what this one writes. Only meaningful with atomic interlock.
    pub needs_barrier: bool,
    pub image_texture: Option<&'a ImageTexture>,
    /// Dynamic offset of this batch's [`ImageDrawUniforms`].
    pub image_draw_data_offset: u32,
    pub image_mesh: Option<ImageMeshBuffers<'a>>,
}

impl<'a> DrawBatch<'a> {
    pub fn new(draw_type: DrawType, element_count: u32) -> Self {
        Self {
            draw_type,
            element_count,
            base_element: 0,
            shader_features: ShaderFeatures::NONE,
            needs_barrier: false,
            image_texture: None,
            image_draw_data_offset: 0,
            image_mesh: None,
        }
    }
}

/// Everything one flush reads, prepared by the upstream stage.
///
/// Offsets and `first_*` indices address the current slot of the
/// corresponding [`FlushBufferKind`] ring.
#[derive(Clone)]
pub struct FlushDescriptor<'a> {
    pub render_target: &'a RenderTarget,
    pub interlock_mode: InterlockMode,
    pub color_load_action: LoadAction,
    pub clear_color: Color,
    pub coverage_clear_value: u32,
    /// The region of the render target this flush changes.
    pub render_target_update_bounds: IntRect,
    pub flush_uniform_data_offset_in_bytes: u64,
    pub first_path: u32,
    pub first_paint: u32,
    pub first_paint_aux: u32,
    pub first_contour: u32,
    pub complex_grad_span_count: u32,
    pub first_complex_grad_span: u32,
    pub complex_grad_rows_top: u32,
    pub complex_grad_rows_height: u32,
    pub simple_grad_texels_width: u32,
    pub simple_grad_texels_height: u32,
    pub simple_grad_data_offset_in_bytes: u64,
    pub tess_vertex_span_count: u32,
    pub first_tess_vertex_span: u32,
    pub tess_data_height: u32,
    /// Union of the shader features of every batch.
    pub combined_shader_features: ShaderFeatures,
    pub draw_list: &'a [DrawBatch<'a>],
    pub wireframe: bool,
    pub is_final_flush_of_frame: bool,
    /// Signaled when the frame's work is done; kept for its ring slot.
    pub frame_completion_fence: Option<Arc<dyn CompletionFence>>,
}

impl<'a> FlushDescriptor<'a> {
    /// A raster-ordered flush that clears the whole target to transparent.
    pub fn new(render_target: &'a RenderTarget, draw_list: &'a [DrawBatch<'a>]) -> Self {
        Self {
            render_target,
            interlock_mode: InterlockMode::RasterOrdering,
            color_load_action: LoadAction::Clear,
            clear_color: Color::TRANSPARENT,
            coverage_clear_value: 0,
            render_target_update_bounds: IntRect::from_size(
                render_target.width(),
                render_target.height(),
            ),
            flush_uniform_data_offset_in_bytes: 0,
            first_path: 0,
            first_paint: 0,
            first_paint_aux: 0,
            first_contour: 0,
            complex_grad_span_count: 0,
            first_complex_grad_span: 0,
            complex_grad_rows_top: 0,
            complex_grad_rows_height: 0,
            simple_grad_texels_width: 0,
            simple_grad_texels_height: 0,
            simple_grad_data_offset_in_bytes: 0,
            tess_vertex_span_count: 0,
            first_tess_vertex_span: 0,
            tess_data_height: 0,
            combined_shader_features: ShaderFeatures::NONE,
            draw_list,
            wireframe: false,
            is_final_flush_of_frame: true,
            frame_completion_fence: None,
        }
    }
}

/// The views bound as pixel local storage for one flush.
struct PlsViews {
    color: TextureViewHandle,
    clip: TextureViewHandle,
    scratch_color: Option<TextureViewHandle>,
    coverage: TextureViewHandle,
}

/// Copies `rect` from `src` to `dst`, both in the general layout before and after.
fn record_copy(recording: &mut Recording, src: TextureHandle, dst: TextureHandle, rect: IntRect) {
    recording.image_barrier(src, ImageLayout::General, ImageLayout::TransferSrc);
    recording.image_barrier(dst, ImageLayout::General, ImageLayout::TransferDst);
    recording.push(Command::BlitSubRect { src, dst, rect });
    recording.image_barrier(src, ImageLayout::TransferSrc, ImageLayout::General);
    recording.image_barrier(dst, ImageLayout::TransferDst, ImageLayout::General);
}

/// Rejects a draw list that can't be recorded in full.
///
/// Runs before a flush records anything, so a rejected flush leaves pending
/// uploads and render target planes for the next one.
fn validate_draw_list(desc: &FlushDescriptor<'_>) -> Result<()> {
    for batch in desc.draw_list.iter().filter(|batch| batch.element_count > 0) {
        draw_program(batch.draw_type, desc.interlock_mode)?;
        if batch.draw_type == DrawType::ImageMesh {
            let mesh = batch.image_mesh.ok_or(Error::MissingImageMeshBuffers)?;
            for buffer in [mesh.vertices, mesh.uvs, mesh.indices] {
                buffer.front_buffer()?;
            }
        }
    }
    Ok(())
}

fn storage_write(binding: u32, storage: BufferBinding) -> DescriptorWrite {
    DescriptorWrite::buffer(
        binding,
        DescriptorType::StorageBuffer,
        storage.buffer,
        storage.offset,
        storage.size,
    )
}

impl<A: GpuResourceAllocator> RenderContext<A> {
    /// Records the GPU work of one flush into `recording`.
    ///
    /// The flush buffers must have been written for the current frame. Depth
    /// stencil interlock isn't supported; such flushes record nothing.
    pub fn flush(&mut self, desc: &FlushDescriptor<'_>, recording: &mut Recording) -> Result<()> {
        if desc.interlock_mode == InterlockMode::DepthStencil {
            // TODO: Render depth/stencil flushes with an MSAA fallback.
            log::warn!("depth/stencil interlock is not supported; skipping flush");
            return Ok(());
        }
        validate_draw_list(desc)?;

        let mut descriptor_pool = self.acquire_descriptor_pool()?;
        let result = self.record_flush(desc, &mut descriptor_pool, recording);
        self.release_descriptor_pool(descriptor_pool);
        result?;
        if desc.is_final_flush_of_frame {
            self.frame_completion_fences[self.buffer_ring_index] =
                desc.frame_completion_fence.clone();
        }
        Ok(())
    }

    fn record_flush(
        &mut self,
        desc: &FlushDescriptor<'_>,
        descriptor_pool: &mut DescriptorPoolHandle,
        recording: &mut Recording,
    ) -> Result<()> {
        self.render_color_ramps(desc, *descriptor_pool, recording)?;
        self.tessellate(desc, *descriptor_pool, recording)?;

        self.null_image_texture.synchronize(&mut self.resources, recording);
        for batch in desc.draw_list {
            if let Some(image) = batch.image_texture {
                image.synchronize(&mut self.resources, recording);
            }
        }

        let atomics = desc.interlock_mode == InterlockMode::Atomics;
        let fixed_function_color_blend = self.features.independent_blend
            && atomics
            && !desc.combined_shader_features.advanced_blend;
        let options = DrawPipelineLayoutOptions {
            fixed_function_color_blend,
        };
        let target = desc.render_target;
        let is_bgra = target.framebuffer_format() == TextureFormat::Bgra8Unorm;
        let variant = render_pass_variant_index(desc.color_load_action, is_bgra);

        let layout_index = draw_pipeline_layout_index(desc.interlock_mode, options);
        let layout = match self.draw_pipeline_layouts[layout_index].take() {
            Some(layout) => layout,
            None => {
                log::debug!(
                    "building draw pipeline layout for {:?} interlock {options:?}",
                    desc.interlock_mode
                );
                DrawPipelineLayout::new(
                    self.resources.allocator_mut(),
                    desc.interlock_mode,
                    options,
                    self.null_image_texture.view(),
                    self.linear_sampler,
                    self.mipmap_sampler,
                )?
            }
        };
        let layout = self.draw_pipeline_layouts[layout_index].insert(layout);
        let render_pass = layout.render_pass_at(self.resources.allocator_mut(), variant)?;
        let pipeline_layout = layout.pipeline_layout();
        let per_flush_layout = layout.set_layout(set::PER_FLUSH);
        let per_draw_layout = layout.set_layout(set::PER_DRAW);
        let pls_layout = layout.set_layout(set::PLS_TEXTURE);
        let null_image_set = layout.null_image_set();
        let sampler_set = layout.sampler_set();
        let pls_attachment_count = layout.pls_attachment_count();

        // Draw straight into the target when it can be read back as an input
        // attachment, or when color never needs reading back.
        let render_offscreen = !(target.supports_usage(TextureUsages::INPUT_ATTACHMENT)
            || fixed_function_color_blend);
        let pls = self.ensure_pls_views(target, atomics, render_offscreen, recording)?;
        let offscreen_texture = target.attachment_texture(AttachmentRole::OffscreenColor);
        if render_offscreen && desc.color_load_action == LoadAction::PreserveRenderTarget {
            let offscreen = offscreen_texture.ok_or(Error::UnknownResource("offscreen color"))?;
            record_copy(
                recording,
                target.target_texture()?,
                offscreen,
                desc.render_target_update_bounds,
            );
        }

        let mut attachments: SmallVec<[TextureViewHandle; 4]> = SmallVec::new();
        attachments.push(pls.color);
        attachments.push(pls.clip);
        if let Some(scratch_color) = pls.scratch_color {
            attachments.push(scratch_color);
            attachments.push(pls.coverage);
        }
        debug_assert_eq!(attachments.len(), pls_attachment_count);
        let framebuffer = self.resources.allocator_mut().create_framebuffer(&FramebufferDesc {
            label: "draw",
            render_pass,
            attachments,
            width: target.width(),
            height: target.height(),
        })?;
        // Only this flush's commands reference the framebuffer.
        self.resources.retire(Resource::Framebuffer(framebuffer));

        let mut needs_barrier_before_next_draw = false;
        if atomics {
            let coverage = target
                .attachment_texture(AttachmentRole::CoverageAtomic)
                .ok_or(Error::UnknownResource("atomic coverage"))?;
            recording.image_barrier(coverage, ImageLayout::General, ImageLayout::TransferDst);
            recording.push(Command::ClearColorImage {
                texture: coverage,
                layout: ImageLayout::TransferDst,
                value: ClearValue::Uint([desc.coverage_clear_value, 0, 0, 0]),
            });
            recording.image_barrier(coverage, ImageLayout::TransferDst, ImageLayout::General);
            // The first draw reads the color plane the load op just cleared.
            if desc.color_load_action == LoadAction::Clear {
                needs_barrier_before_next_draw = true;
            }
        }

        let clear_color = ClearValue::Color(desc.clear_color.premultiply().components);
        let mut clear_values: SmallVec<[ClearValue; 4]> =
            SmallVec::from_slice(&[clear_color, ClearValue::Uint([0; 4])]);
        if !atomics {
            clear_values.push(ClearValue::None);
            clear_values.push(ClearValue::Uint([desc.coverage_clear_value, 0, 0, 0]));
        }
        let area = IntRect::from_size(target.width(), target.height());
        recording.begin_render_pass(render_pass, framebuffer, area, &clear_values);
        recording.set_viewport_and_scissor(area);

        let frame = self.resources.current_frame();
        let per_flush_set = self.write_per_flush_set(desc, *descriptor_pool, per_flush_layout)?;
        let pls_set = self.write_pls_set(&pls, options, *descriptor_pool, pls_layout)?;
        recording.bind_descriptor_sets(
            pipeline_layout,
            set::PER_FLUSH,
            &[per_flush_set, null_image_set, sampler_set, pls_set],
            &[0],
        );

        let wireframe = desc.wireframe && self.features.fill_mode_non_solid;
        let misc_flags = ShaderMiscFlags {
            fixed_function_color_blend,
        };
        let mut image_sets_in_pool = 0;
        let mut draw_count = 0;
        for batch in desc.draw_list {
            if batch.element_count == 0 {
                continue;
            }

            if let Some(image) = batch.image_texture {
                let image_set = match image.descriptor_set_for_frame(frame) {
                    Some(image_set) => image_set,
                    None => {
                        if image_sets_in_pool >= descriptor_limits::MAX_IMAGE_TEXTURE_UPDATES {
                            self.release_descriptor_pool(*descriptor_pool);
                            *descriptor_pool = self.acquire_descriptor_pool()?;
                            image_sets_in_pool = 0;
                        }
                        let allocator = self.resources.allocator_mut();
                        let image_set =
                            allocator.allocate_descriptor_set(*descriptor_pool, per_draw_layout)?;
                        allocator.write_descriptor_set(
                            image_set,
                            &[DescriptorWrite::texture(
                                binding::IMAGE_TEXTURE,
                                DescriptorType::SampledImage,
                                image.view(),
                                ImageLayout::ShaderReadOnly,
                            )],
                        )?;
                        image.cache_descriptor_set(image_set, frame);
                        image_sets_in_pool += 1;
                        image_set
                    }
                };
                recording.bind_descriptor_sets(
                    pipeline_layout,
                    set::PER_FLUSH,
                    &[per_flush_set, image_set],
                    &[batch.image_draw_data_offset],
                );
            }

            // Atomic draws share one shader per feature set across the flush.
            let shader_features = if atomics {
                desc.combined_shader_features
            } else {
                batch.shader_features
            };
            let shader_key = shader_unique_key(
                batch.draw_type,
                shader_features,
                desc.interlock_mode,
                misc_flags,
            );
            let shader = *self.draw_shaders.get_or_try_insert_with(shader_key, || {
                log::debug!("building {:?} draw shader {shader_key:#x}", batch.draw_type);
                DrawShader::new(
                    self.resources.allocator_mut(),
                    batch.draw_type,
                    desc.interlock_mode,
                    fixed_function_color_blend,
                )
            })?;
            let pipeline_key = draw_pipeline_key(shader_key, wireframe, variant);
            let pipeline = self
                .draw_pipelines
                .get_or_try_insert_with(pipeline_key, || {
                    DrawPipeline::new(
                        self.resources.allocator_mut(),
                        &DrawPipelineParams {
                            draw_type: batch.draw_type,
                            shader_features,
                            interlock_mode: desc.interlock_mode,
                            fixed_function_color_blend,
                            wireframe,
                            shader,
                            pipeline_layout,
                            render_pass,
                            pls_attachment_count,
                        },
                    )
                })?
                .handle;
            recording.bind_pipeline(pipeline);

            if needs_barrier_before_next_draw {
                recording.memory_barrier(MemoryBarrier::COLOR_WRITE_TO_INPUT_READ);
            }
            self.record_draw(batch, recording)?;
            draw_count += 1;
            needs_barrier_before_next_draw = atomics && batch.needs_barrier;
        }
        recording.end_render_pass();

        if render_offscreen {
            let offscreen = offscreen_texture.ok_or(Error::UnknownResource("offscreen color"))?;
            record_copy(
                recording,
                offscreen,
                target.target_texture()?,
                desc.render_target_update_bounds,
            );
        }

        log::trace!(
            "flushed {draw_count} draws in {:?} interlock{}",
            desc.interlock_mode,
            if render_offscreen { " offscreen" } else { "" }
        );
        Ok(())
    }

    /// Renders complex ramps and copies simple ramps into the gradient
    /// texture, then makes it readable by the draw pass.
    fn render_color_ramps(
        &mut self,
        desc: &FlushDescriptor<'_>,
        descriptor_pool: DescriptorPoolHandle,
        recording: &mut Recording,
    ) -> Result<()> {
        let gradient = self.gradient_texture.texture;
        recording.image_barrier(gradient, ImageLayout::Undefined, ImageLayout::ColorAttachment);
        if desc.complex_grad_span_count > 0 {
            let pass = ColorRampPass {
                framebuffer: self.gradient_texture.framebuffer,
                flush_uniforms: self.flush_uniform_binding(desc)?,
                span_buffer: self.flush_buffer(FlushBufferKind::GradientSpan)?,
                first_span: desc.first_complex_grad_span,
                span_count: desc.complex_grad_span_count,
                rows_top: desc.complex_grad_rows_top,
                rows_height: desc.complex_grad_rows_height,
            };
            self.color_ramp_pipeline.record(
                self.resources.allocator_mut(),
                descriptor_pool,
                &pass,
                recording,
            )?;
        }
        recording.image_barrier(gradient, ImageLayout::ColorAttachment, ImageLayout::TransferDst);
        if desc.simple_grad_texels_height > 0 {
            recording.push(Command::CopyBufferToImage {
                buffer: self.flush_buffer(FlushBufferKind::SimpleColorRamp)?,
                offset: desc.simple_grad_data_offset_in_bytes,
                row_length: GRAD_TEXTURE_WIDTH,
                texture: gradient,
                width: desc.simple_grad_texels_width,
                height: desc.simple_grad_texels_height,
            });
        }
        recording.image_barrier(gradient, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly);
        Ok(())
    }

    fn tessellate(
        &mut self,
        desc: &FlushDescriptor<'_>,
        descriptor_pool: DescriptorPoolHandle,
        recording: &mut Recording,
    ) -> Result<()> {
        let tessellation = self.tessellation_texture.texture;
        recording.image_barrier(
            tessellation,
            ImageLayout::Undefined,
            ImageLayout::ColorAttachment,
        );
        if desc.tess_vertex_span_count > 0 {
            let pass = TessellatePass {
                framebuffer: self.tessellation_texture.framebuffer,
                flush_uniforms: self.flush_uniform_binding(desc)?,
                paths: self.flush_buffer_binding(
                    FlushBufferKind::Path,
                    element_offset::<PathData>(desc.first_path),
                )?,
                contours: self.flush_buffer_binding(
                    FlushBufferKind::Contour,
                    element_offset::<ContourData>(desc.first_contour),
                )?,
                span_buffer: self.flush_buffer(FlushBufferKind::TessVertexSpan)?,
                span_index_buffer: self.static_buffers.tess_span_indices,
                first_span: desc.first_tess_vertex_span,
                span_count: desc.tess_vertex_span_count,
                data_height: desc.tess_data_height,
            };
            self.tessellate_pipeline.record(
                self.resources.allocator_mut(),
                descriptor_pool,
                &pass,
                recording,
            )?;
        }
        recording.image_barrier(
            tessellation,
            ImageLayout::ColorAttachment,
            ImageLayout::ShaderReadOnly,
        );
        Ok(())
    }

    fn flush_uniform_binding(&self, desc: &FlushDescriptor<'_>) -> Result<BufferBinding> {
        let mut binding = self.flush_buffer_binding(
            FlushBufferKind::FlushUniform,
            desc.flush_uniform_data_offset_in_bytes,
        )?;
        binding.size = size_of::<FlushUniforms>() as u64;
        Ok(binding)
    }

    fn ensure_pls_views(
        &mut self,
        target: &RenderTarget,
        atomics: bool,
        render_offscreen: bool,
        recording: &mut Recording,
    ) -> Result<PlsViews> {
        let resources = &mut self.resources;
        let color = if render_offscreen {
            target.ensure_offscreen_color(resources, recording)?
        } else {
            target.target_view()?
        };
        let clip = target.ensure_clip(resources, recording)?;
        let (scratch_color, coverage) = if atomics {
            (None, target.ensure_coverage_atomic(resources, recording)?)
        } else {
            (
                Some(target.ensure_scratch_color(resources, recording)?),
                target.ensure_coverage(resources, recording)?,
            )
        };
        Ok(PlsViews {
            color,
            clip,
            scratch_color,
            coverage,
        })
    }

    fn write_per_flush_set(
        &mut self,
        desc: &FlushDescriptor<'_>,
        descriptor_pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let flush_uniforms = self.flush_uniform_binding(desc)?;
        let image_draw_uniforms = self.flush_buffer(FlushBufferKind::ImageDrawUniform)?;
        let writes = [
            DescriptorWrite::texture(
                binding::TESS_VERTEX_TEXTURE,
                DescriptorType::SampledImage,
                self.tessellation_texture.view,
                ImageLayout::ShaderReadOnly,
            ),
            DescriptorWrite::texture(
                binding::GRAD_TEXTURE,
                DescriptorType::SampledImage,
                self.gradient_texture.view,
                ImageLayout::ShaderReadOnly,
            ),
            storage_write(
                binding::PATH_BUFFER,
                self.flush_buffer_binding(
                    FlushBufferKind::Path,
                    element_offset::<PathData>(desc.first_path),
                )?,
            ),
            storage_write(
                binding::PAINT_BUFFER,
                self.flush_buffer_binding(
                    FlushBufferKind::Paint,
                    element_offset::<PaintData>(desc.first_paint),
                )?,
            ),
            storage_write(
                binding::PAINT_AUX_BUFFER,
                self.flush_buffer_binding(
                    FlushBufferKind::PaintAux,
                    element_offset::<PaintAuxData>(desc.first_paint_aux),
                )?,
            ),
            storage_write(
                binding::CONTOUR_BUFFER,
                self.flush_buffer_binding(
                    FlushBufferKind::Contour,
                    element_offset::<ContourData>(desc.first_contour),
                )?,
            ),
            DescriptorWrite::buffer(
                binding::FLUSH_UNIFORM_BUFFER,
                DescriptorType::UniformBuffer,
                flush_uniforms.buffer,
                flush_uniforms.offset,
                flush_uniforms.size,
            ),
            DescriptorWrite::buffer(
                binding::IMAGE_DRAW_UNIFORM_BUFFER,
                DescriptorType::DynamicUniformBuffer,
                image_draw_uniforms,
                0,
                size_of::<ImageDrawUniforms>() as u64,
            ),
        ];
        let allocator = self.resources.allocator_mut();
        let set = allocator.allocate_descriptor_set(descriptor_pool, layout)?;
        allocator.write_descriptor_set(set, &writes)?;
        Ok(set)
    }

    fn write_pls_set(
        &mut self,
        pls: &PlsViews,
        options: DrawPipelineLayoutOptions,
        descriptor_pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let input = |binding, view| {
            DescriptorWrite::texture(
                binding,
                DescriptorType::InputAttachment,
                view,
                ImageLayout::General,
            )
        };
        let mut writes: SmallVec<[DescriptorWrite; 4]> = SmallVec::new();
        if !options.fixed_function_color_blend {
            writes.push(input(plane::COLOR, pls.color));
        }
        writes.push(input(plane::CLIP, pls.clip));
        if let Some(scratch_color) = pls.scratch_color {
            writes.push(input(plane::SCRATCH_COLOR, scratch_color));
        }
        writes.push(if pls.scratch_color.is_none() {
            DescriptorWrite::texture(
                plane::COVERAGE,
                DescriptorType::StorageImage,
                pls.coverage,
                ImageLayout::General,
            )
        } else {
            input(plane::COVERAGE, pls.coverage)
        });
        let allocator = self.resources.allocator_mut();
        let set = allocator.allocate_descriptor_set(descriptor_pool, layout)?;
        allocator.write_descriptor_set(set, &writes)?;
        Ok(set)
    }

    /// Binds a batch's geometry and issues its draw call.
    fn record_draw(&self, batch: &DrawBatch<'_>, recording: &mut Recording) -> Result<()> {
        let statics = &self.static_buffers;
        match batch.draw_type {
            DrawType::MidpointFanPatches | DrawType::OuterCurvePatches => {
                recording.bind_vertex_buffers(0, &[(statics.patch_vertices, 0)]);
                recording.bind_index_buffer(statics.patch_indices, 0, IndexFormat::Uint16);
                recording.draw_indexed(
                    patch_index_count(batch.draw_type),
                    batch.element_count,
                    patch_base_index(batch.draw_type),
                    0,
                    batch.base_element,
                );
            }
            DrawType::InteriorTriangulation => {
                let triangles = self.flush_buffer(FlushBufferKind::Triangle)?;
                recording.bind_vertex_buffers(0, &[(triangles, 0)]);
                recording.draw(batch.element_count, 1, batch.base_element, 0);
            }
            DrawType::ImageRect => {
                recording.bind_vertex_buffers(0, &[(statics.image_rect_vertices, 0)]);
                recording.bind_index_buffer(statics.image_rect_indices, 0, IndexFormat::Uint16);
                recording.draw_indexed(
                    IMAGE_RECT_INDICES.len() as u32,
                    1,
                    batch.base_element,
                    0,
                    0,
                );
            }
            DrawType::ImageMesh => {
                let mesh = batch.image_mesh.ok_or(Error::MissingImageMeshBuffers)?;
                recording.bind_vertex_buffers(
                    0,
                    &[
                        (mesh.vertices.front_buffer()?, 0),
                        (mesh.uvs.front_buffer()?, 0),
                    ],
                );
                recording.bind_index_buffer(mesh.indices.front_buffer()?, 0, IndexFormat::Uint16);
                recording.draw_indexed(batch.element_count, 1, batch.base_element, 0, 0);
            }
            DrawType::AtomicResolve => {
                recording.draw(4, 1, 0, 0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceFeatures;
    use crate::hal::{BlendState, ResourceKind, TextureDesc};
    use crate::recording::ImageBarrier;
    use crate::{HostAllocator, HostFence};
    use inlay_encoding::BUFFER_RING_SIZE;

    const SIZE: u32 = 64;

    fn context() -> RenderContext<HostAllocator> {
        let mut context = RenderContext::new(HostAllocator::new(), DeviceFeatures::all()).unwrap();
        for kind in FlushBufferKind::ALL {
            context.resize_flush_buffer(kind, 256);
        }
        context.prepare_to_map_buffers().unwrap();
        context
    }

    fn target(context: &mut RenderContext<HostAllocator>, usage: TextureUsages) -> RenderTarget {
        let target = RenderTarget::new(SIZE, SIZE, TextureFormat::Rgba8Unorm, usage);
        let allocator = context.resources_mut().allocator_mut();
        let texture = allocator
            .create_texture(&TextureDesc {
                label: "target",
                width: SIZE,
                height: SIZE,
                mip_level_count: 1,
                format: TextureFormat::Rgba8Unorm,
                usage,
            })
            .unwrap();
        let view = allocator.create_texture_view(texture).unwrap();
        target.set_target_texture(texture, view);
        target
    }

    fn readable_target(context: &mut RenderContext<HostAllocator>) -> RenderTarget {
        target(
            context,
            TextureUsages::COLOR_ATTACHMENT | TextureUsages::INPUT_ATTACHMENT,
        )
    }

    fn count(recording: &Recording, name: &str) -> usize {
        recording
            .commands
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    #[test]
    fn depth_stencil_flushes_record_nothing() {
        let mut context = context();
        let target = readable_target(&mut context);
        let mut desc = FlushDescriptor::new(&target, &[]);
        desc.interlock_mode = InterlockMode::DepthStencil;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();
        assert!(recording.is_empty());
    }

    #[test]
    fn empty_gradients_skip_the_ramp_passes() {
        let mut context = context();
        let target = readable_target(&mut context);
        let mut recording = Recording::default();
        context
            .flush(&FlushDescriptor::new(&target, &[]), &mut recording)
            .unwrap();
        let gradient = context.gradient_texture.texture;
        assert!(!recording.commands.iter().any(|command| matches!(
            command,
            Command::CopyBufferToImage { texture, .. } if *texture == gradient
        )));
        // Only the draw pass begins.
        assert_eq!(count(&recording, "begin_render_pass"), 1);
    }

    #[test]
    fn gradients_render_and_copy_before_the_draw_pass() {
        let mut context = context();
        let target = readable_target(&mut context);
        let mut desc = FlushDescriptor::new(&target, &[]);
        desc.complex_grad_span_count = 2;
        desc.complex_grad_rows_height = 1;
        desc.simple_grad_texels_width = 4;
        desc.simple_grad_texels_height = 1;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();

        let simple_ramps = context.flush_buffer(FlushBufferKind::SimpleColorRamp).unwrap();
        let copy = recording
            .commands
            .iter()
            .position(|command| {
                matches!(
                    command,
                    Command::CopyBufferToImage { buffer, .. } if *buffer == simple_ramps
                )
            })
            .unwrap();
        let passes: Vec<_> = recording
            .commands
            .iter()
            .enumerate()
            .filter(|(_, command)| command.name() == "begin_render_pass")
            .map(|(index, _)| index)
            .collect();
        assert_eq!(passes.len(), 2);
        assert!(passes[0] < copy && copy < passes[1]);
    }

    #[test]
    fn raster_ordering_draws_straight_into_a_readable_target() {
        let mut context = context();
        let target = readable_target(&mut context);
        let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 3)];
        let mut recording = Recording::default();
        context
            .flush(&FlushDescriptor::new(&target, &batches), &mut recording)
            .unwrap();

        assert_eq!(count(&recording, "blit_sub_rect"), 0);
        assert!(target
            .attachment_texture(AttachmentRole::OffscreenColor)
            .is_none());
        let Some(Command::BeginRenderPass {
            framebuffer,
            clear_values,
            ..
        }) = recording
            .commands
            .iter()
            .rfind(|command| command.name() == "begin_render_pass")
        else {
            panic!("no draw pass");
        };
        let framebuffer = context.allocator().framebuffer_desc(*framebuffer).unwrap();
        assert_eq!(framebuffer.attachments[0], target.target_view().unwrap());
        assert_eq!(framebuffer.attachments.len(), 4);
        assert_eq!(clear_values.len(), 4);
        assert!(recording.commands.contains(&Command::DrawIndexed {
            index_count: patch_index_count(DrawType::MidpointFanPatches),
            instance_count: 3,
            first_index: patch_base_index(DrawType::MidpointFanPatches),
            base_vertex: 0,
            first_instance: 0,
        }));
    }

    #[test]
    fn unreadable_targets_round_trip_through_offscreen_color() {
        let mut context = context();
        let target = target(&mut context, TextureUsages::COLOR_ATTACHMENT);
        let mut desc = FlushDescriptor::new(&target, &[]);
        desc.color_load_action = LoadAction::PreserveRenderTarget;
        desc.render_target_update_bounds = IntRect::new(8, 8, 32, 32);
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();

        let offscreen = target
            .attachment_texture(AttachmentRole::OffscreenColor)
            .unwrap();
        let target_texture = target.target_texture().unwrap();
        let blits: Vec<_> = recording
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::BlitSubRect { src, dst, rect } => Some((*src, *dst, *rect)),
                _ => None,
            })
            .collect();
        let bounds = IntRect::new(8, 8, 32, 32);
        assert_eq!(
            blits,
            [
                (target_texture, offscreen, bounds),
                (offscreen, target_texture, bounds)
            ]
        );

        // Cleared contents don't need copying in.
        let mut recording = Recording::default();
        context
            .flush(&FlushDescriptor::new(&target, &[]), &mut recording)
            .unwrap();
        assert_eq!(count(&recording, "blit_sub_rect"), 1);
    }

    #[test]
    fn atomic_batches_are_separated_by_barriers_when_needed() {
        let mut context = context();
        let target = readable_target(&mut context);
        let mut first = DrawBatch::new(DrawType::MidpointFanPatches, 1);
        first.needs_barrier = true;
        let second = DrawBatch::new(DrawType::InteriorTriangulation, 3);
        let third = DrawBatch::new(DrawType::AtomicResolve, 1);
        let batches = [first, second, third];
        let mut desc = FlushDescriptor::new(&target, &batches);
        desc.interlock_mode = InterlockMode::Atomics;
        desc.color_load_action = LoadAction::DontCare;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();
        assert_eq!(count(&recording, "memory_barrier"), 1);
        assert_eq!(count(&recording, "clear_color_image"), 1);

        // Clearing adds a barrier before the first draw.
        desc.color_load_action = LoadAction::Clear;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();
        assert_eq!(count(&recording, "memory_barrier"), 2);
    }

    #[test]
    fn atomic_flushes_blend_color_in_fixed_function() {
        let mut context = context();
        let target = target(&mut context, TextureUsages::COLOR_ATTACHMENT);
        let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 1)];
        let mut desc = FlushDescriptor::new(&target, &batches);
        desc.interlock_mode = InterlockMode::Atomics;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();

        // Color is never read back, so no offscreen copy is needed.
        assert_eq!(count(&recording, "blit_sub_rect"), 0);
        let Some(Command::BindPipeline(pipeline)) = recording
            .commands
            .iter()
            .rfind(|command| command.name() == "bind_pipeline")
        else {
            panic!("no draw pipeline");
        };
        let pipeline = context.allocator().pipeline_desc(*pipeline).unwrap();
        assert_eq!(
            pipeline.color_targets[plane::COLOR as usize],
            Some(BlendState::PREMULTIPLIED_ALPHA)
        );
    }

    #[test]
    fn empty_batches_are_skipped() {
        let mut context = context();
        let target = readable_target(&mut context);
        let batches = [
            DrawBatch::new(DrawType::MidpointFanPatches, 0),
            DrawBatch::new(DrawType::InteriorTriangulation, 0),
        ];
        let mut recording = Recording::default();
        context
            .flush(&FlushDescriptor::new(&target, &batches), &mut recording)
            .unwrap();
        assert_eq!(count(&recording, "bind_pipeline"), 0);
        assert_eq!(context.draw_pipeline_count(), 0);
    }

    #[test]
    fn draw_pipelines_are_built_once() {
        let mut context = context();
        let target = readable_target(&mut context);
        let batches = [
            DrawBatch::new(DrawType::MidpointFanPatches, 2),
            DrawBatch::new(DrawType::MidpointFanPatches, 5),
        ];
        for _ in 0..2 {
            let mut recording = Recording::default();
            context
                .flush(&FlushDescriptor::new(&target, &batches), &mut recording)
                .unwrap();
        }
        assert_eq!(context.draw_pipeline_count(), 1);
        assert_eq!(context.draw_shader_count(), 1);
        // One draw render pass for the one load action and format used.
        let render_passes = context.allocator().created_count(ResourceKind::RenderPass);
        let mut recording = Recording::default();
        context
            .flush(&FlushDescriptor::new(&target, &batches), &mut recording)
            .unwrap();
        assert_eq!(
            context.allocator().created_count(ResourceKind::RenderPass),
            render_passes
        );
    }

    #[test]
    fn image_rects_are_rejected_with_raster_ordering() {
        let mut context = context();
        let target = readable_target(&mut context);
        let batches = [DrawBatch::new(DrawType::ImageRect, 1)];
        let mut recording = Recording::default();
        assert!(matches!(
            context.flush(&FlushDescriptor::new(&target, &batches), &mut recording),
            Err(Error::InvalidDrawType {
                draw_type: DrawType::ImageRect,
                interlock_mode: InterlockMode::RasterOrdering,
            })
        ));
        assert!(recording.is_empty());
        // Rejected before a descriptor pool is taken.
        assert_eq!(context.recycled_descriptor_pool_count(), 0);
    }

    #[test]
    fn rejected_flushes_leave_uploads_and_planes_for_the_retry() {
        let mut context = context();
        let target = readable_target(&mut context);
        let image = context.make_image_texture(4, 4, &[255; 64]).unwrap();
        let mut batch = DrawBatch::new(DrawType::ImageRect, 1);
        batch.image_texture = Some(&image);
        let batches = [batch];
        let mut desc = FlushDescriptor::new(&target, &batches);
        let mut recording = Recording::default();
        assert!(context.flush(&desc, &mut recording).is_err());
        assert!(recording.is_empty());
        assert!(image.has_pending_upload());
        assert!(target.attachment_texture(AttachmentRole::Clip).is_none());

        desc.interlock_mode = InterlockMode::Atomics;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();
        let image_texture = image.texture();
        assert!(recording.commands.iter().any(|command| matches!(
            command,
            Command::CopyBufferToImage { texture, .. } if *texture == image_texture
        )));
        let clip = target.attachment_texture(AttachmentRole::Clip).unwrap();
        assert!(recording
            .commands
            .contains(&Command::ImageBarrier(ImageBarrier {
                texture: clip,
                old_layout: ImageLayout::Undefined,
                new_layout: ImageLayout::General,
                base_mip_level: 0,
                mip_level_count: 1,
            })));
    }

    #[test]
    fn image_meshes_need_their_buffers() {
        let mut context = context();
        let target = readable_target(&mut context);
        let batches = [DrawBatch::new(DrawType::ImageMesh, 6)];
        let mut recording = Recording::default();
        assert!(matches!(
            context.flush(&FlushDescriptor::new(&target, &batches), &mut recording),
            Err(Error::MissingImageMeshBuffers)
        ));
        assert!(recording.is_empty());
    }

    #[test]
    fn image_descriptor_sets_are_shared_within_a_frame() {
        let mut context = context();
        let target = readable_target(&mut context);
        let image = context.make_image_texture(4, 4, &[255; 64]).unwrap();
        let mut batch = DrawBatch::new(DrawType::ImageRect, 1);
        batch.image_texture = Some(&image);
        batch.image_draw_data_offset = 256;
        let batches = [batch.clone(), batch];
        let mut desc = FlushDescriptor::new(&target, &batches);
        desc.interlock_mode = InterlockMode::Atomics;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();

        assert!(!image.has_pending_upload());
        let image_binds: Vec<_> = recording
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::BindDescriptorSets {
                    sets,
                    dynamic_offsets,
                    ..
                } if sets.len() == 2 => Some((sets[1], dynamic_offsets[0])),
                _ => None,
            })
            .collect();
        assert_eq!(image_binds.len(), 2);
        assert_eq!(image_binds[0], image_binds[1]);
        assert_eq!(image_binds[0].1, 256);
        assert!(recording.commands.contains(&Command::DrawIndexed {
            index_count: IMAGE_RECT_INDICES.len() as u32,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }));
    }

    #[test]
    fn image_heavy_flushes_spill_into_a_second_descriptor_pool() {
        let mut context = context();
        let target = readable_target(&mut context);
        let image_count = descriptor_limits::MAX_IMAGE_TEXTURE_UPDATES as usize + 44;
        let images: Vec<_> = (0..image_count)
            .map(|_| context.make_image_texture(1, 1, &[0, 0, 0, 255]).unwrap())
            .collect();
        let batches: Vec<_> = images
            .iter()
            .map(|image| {
                let mut batch = DrawBatch::new(DrawType::ImageRect, 1);
                batch.image_texture = Some(image);
                batch
            })
            .collect();
        let mut desc = FlushDescriptor::new(&target, &batches);
        desc.interlock_mode = InterlockMode::Atomics;
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();

        assert_eq!(count(&recording, "draw_indexed"), image_count);
        // The full pool and the one that took the overflow.
        assert_eq!(context.recycled_descriptor_pool_count(), 2);
    }

    #[test]
    fn final_flushes_keep_the_frame_fence() {
        let mut context = context();
        let target = readable_target(&mut context);
        let fence = Arc::new(HostFence::new());
        let mut desc = FlushDescriptor::new(&target, &[]);
        desc.frame_completion_fence = Some(fence.clone());
        let mut recording = Recording::default();
        context.flush(&desc, &mut recording).unwrap();
        for _ in 0..BUFFER_RING_SIZE {
            context.prepare_to_map_buffers().unwrap();
        }
        assert_eq!(fence.wait_count(), 1);
    }
}
