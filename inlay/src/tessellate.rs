// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tessellation of curve spans into the tessellation texture.
//!
//! Each [`TessVertexSpan`] instance rasterizes a horizontal run of texels,
//! one per tessellated vertex, which the draw shaders later fetch by index.

use inlay_encoding::{binding, IntRect, TessVertexSpan, TESS_SPAN_INDICES, TESS_TEXTURE_WIDTH};
use smallvec::smallvec;

use crate::hal::{
    AttachmentDesc, BufferHandle, CullMode, DescriptorPoolHandle, DescriptorSetLayoutDesc,
    DescriptorSetLayoutEntry, DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite,
    FramebufferHandle, FrontFace, GpuResourceAllocator, GraphicsPipelineDesc, ImageLayout,
    IndexFormat, LoadOp, PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle, PolygonMode,
    PrimitiveTopology, RenderPassDesc, RenderPassHandle, Resource, ShaderModuleDesc,
    ShaderProgram, ShaderStage, ShaderStages, StoreOp, TextureFormat, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexStepMode,
};
use crate::recording::Recording;
use crate::ring::{element_offset, BufferBinding};
use crate::Result;

pub(crate) const TESSELLATION_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba32Uint;

pub(crate) struct TessellatePass {
    pub framebuffer: FramebufferHandle,
    pub flush_uniforms: BufferBinding,
    pub paths: BufferBinding,
    pub contours: BufferBinding,
    pub span_buffer: BufferHandle,
    pub span_index_buffer: BufferHandle,
    pub first_span: u32,
    pub span_count: u32,
    pub data_height: u32,
}

pub(crate) struct TessellatePipeline {
    descriptor_set_layout: DescriptorSetLayoutHandle,
    pipeline_layout: PipelineLayoutHandle,
    render_pass: RenderPassHandle,
    pipeline: PipelineHandle,
}

impl TessellatePipeline {
    pub(crate) fn new<A: GpuResourceAllocator>(allocator: &mut A) -> Result<Self> {
        let entry = |binding, ty| DescriptorSetLayoutEntry {
            binding,
            ty,
            stages: ShaderStages::VERTEX,
        };
        let descriptor_set_layout =
            allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                label: "tessellate",
                entries: smallvec![
                    entry(binding::PATH_BUFFER, DescriptorType::StorageBuffer),
                    entry(binding::CONTOUR_BUFFER, DescriptorType::StorageBuffer),
                    entry(binding::FLUSH_UNIFORM_BUFFER, DescriptorType::UniformBuffer),
                ],
            })?;
        let pipeline_layout = allocator.create_pipeline_layout(&PipelineLayoutDesc {
            label: "tessellate",
            set_layouts: smallvec![descriptor_set_layout],
        })?;
        let render_pass = allocator.create_render_pass(&RenderPassDesc {
            label: "tessellate",
            attachments: smallvec![AttachmentDesc {
                format: TESSELLATION_TEXTURE_FORMAT,
                load_op: LoadOp::DontCare,
                store_op: StoreOp::Store,
                layout: ImageLayout::ColorAttachment,
            }],
            color_attachments: smallvec![Some(0)],
            input_attachments: smallvec![],
            raster_order_attachment_access: false,
            self_dependency: None,
        })?;
        let module = |stage| ShaderModuleDesc {
            program: ShaderProgram::Tessellate,
            stage,
            interlock_mode: None,
            fixed_function_color_blend: false,
        };
        let vertex_module = allocator.create_shader_module(&module(ShaderStage::Vertex))?;
        let fragment_module = allocator.create_shader_module(&module(ShaderStage::Fragment))?;

        let attribute = |location, format, offset| VertexAttribute {
            location,
            format,
            offset,
        };
        let pipeline = allocator.create_graphics_pipeline(&GraphicsPipelineDesc {
            label: "tessellate",
            layout: pipeline_layout,
            render_pass,
            vertex_module,
            fragment_module,
            specialization: smallvec![],
            vertex_buffers: smallvec![VertexBufferLayout {
                binding: 0,
                stride: size_of::<TessVertexSpan>() as u32,
                step_mode: VertexStepMode::Instance,
                attributes: smallvec![
                    attribute(0, VertexFormat::Float32x4, 0),
                    attribute(1, VertexFormat::Float32x4, 16),
                    attribute(2, VertexFormat::Float32x4, 32),
                    attribute(3, VertexFormat::Uint32x4, 48),
                ],
            }],
            topology: PrimitiveTopology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            color_targets: smallvec![None],
            raster_order_attachment_access: false,
        })?;
        allocator.destroy(Resource::ShaderModule(vertex_module));
        allocator.destroy(Resource::ShaderModule(fragment_module));
        Ok(Self {
            descriptor_set_layout,
            pipeline_layout,
            render_pass,
            pipeline,
        })
    }

    pub(crate) fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Records the pass over rows `0..data_height` of the tessellation texture.
    pub(crate) fn record<A: GpuResourceAllocator>(
        &self,
        allocator: &mut A,
        descriptor_pool: DescriptorPoolHandle,
        pass: &TessellatePass,
        recording: &mut Recording,
    ) -> Result<()> {
        let set = allocator.allocate_descriptor_set(descriptor_pool, self.descriptor_set_layout)?;
        allocator.write_descriptor_set(
            set,
            &[
                DescriptorWrite::buffer(
                    binding::PATH_BUFFER,
                    DescriptorType::StorageBuffer,
                    pass.paths.buffer,
                    pass.paths.offset,
                    pass.paths.size,
                ),
                DescriptorWrite::buffer(
                    binding::CONTOUR_BUFFER,
                    DescriptorType::StorageBuffer,
                    pass.contours.buffer,
                    pass.contours.offset,
                    pass.contours.size,
                ),
                DescriptorWrite::buffer(
                    binding::FLUSH_UNIFORM_BUFFER,
                    DescriptorType::UniformBuffer,
                    pass.flush_uniforms.buffer,
                    pass.flush_uniforms.offset,
                    pass.flush_uniforms.size,
                ),
            ],
        )?;

        let area = IntRect::from_size(TESS_TEXTURE_WIDTH, pass.data_height);
        recording.begin_render_pass(self.render_pass, pass.framebuffer, area, &[]);
        recording.bind_pipeline(self.pipeline);
        recording.set_viewport_and_scissor(area);
        recording.bind_vertex_buffers(
            0,
            &[(
                pass.span_buffer,
                element_offset::<TessVertexSpan>(pass.first_span),
            )],
        );
        recording.bind_index_buffer(pass.span_index_buffer, 0, IndexFormat::Uint16);
        recording.bind_descriptor_sets(self.pipeline_layout, 0, &[set], &[]);
        recording.draw_indexed(
            TESS_SPAN_INDICES.len() as u32,
            pass.span_count,
            0,
            0,
            0,
        );
        recording.end_render_pass();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{
        BufferDesc, BufferUsages, DescriptorPoolDesc, FramebufferDesc, TextureDesc, TextureUsages,
    };
    use crate::recording::Command;
    use crate::HostAllocator;
    use inlay_encoding::PathData;

    #[test]
    fn pass_covers_the_tessellated_rows() {
        let mut allocator = HostAllocator::new();
        let pipeline = TessellatePipeline::new(&mut allocator).unwrap();
        let texture = allocator
            .create_texture(&TextureDesc {
                label: "tess",
                width: TESS_TEXTURE_WIDTH,
                height: 4,
                mip_level_count: 1,
                format: TESSELLATION_TEXTURE_FORMAT,
                usage: TextureUsages::COLOR_ATTACHMENT,
            })
            .unwrap();
        let view = allocator.create_texture_view(texture).unwrap();
        let framebuffer = allocator
            .create_framebuffer(&FramebufferDesc {
                label: "tess",
                render_pass: pipeline.render_pass(),
                attachments: smallvec![view],
                width: TESS_TEXTURE_WIDTH,
                height: 4,
            })
            .unwrap();
        let buffer = allocator
            .create_buffer(&BufferDesc {
                label: "data",
                size: 1024,
                usage: BufferUsages::VERTEX | BufferUsages::STORAGE | BufferUsages::UNIFORM,
            })
            .unwrap();
        let pool = allocator
            .create_descriptor_pool(&DescriptorPoolDesc {
                label: "test",
                max_sets: 1,
                sizes: smallvec![
                    (DescriptorType::StorageBuffer, 2),
                    (DescriptorType::UniformBuffer, 1)
                ],
            })
            .unwrap();
        let storage = BufferBinding {
            buffer,
            offset: element_offset::<PathData>(1),
            size: 1024 - 32,
        };
        let pass = TessellatePass {
            framebuffer,
            flush_uniforms: BufferBinding {
                buffer,
                offset: 0,
                size: 64,
            },
            paths: storage,
            contours: storage,
            span_buffer: buffer,
            span_index_buffer: buffer,
            first_span: 1,
            span_count: 9,
            data_height: 3,
        };
        let mut recording = Recording::default();
        pipeline
            .record(&mut allocator, pool, &pass, &mut recording)
            .unwrap();

        assert!(matches!(
            recording.commands[0],
            Command::BeginRenderPass { area, .. } if area == IntRect::from_size(2048, 3)
        ));
        assert!(recording.commands.contains(&Command::DrawIndexed {
            index_count: 12,
            instance_count: 9,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }));
        assert!(recording.commands.contains(&Command::BindVertexBuffers {
            first_binding: 0,
            buffers: smallvec![(buffer, 64)],
        }));
    }
}
