// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rendering of complex color ramps into rows of the gradient texture.

use inlay_encoding::{binding, GradientSpan, IntRect, GRAD_TEXTURE_WIDTH};
use smallvec::smallvec;

use crate::hal::{
    AttachmentDesc, BufferHandle, CullMode, DescriptorPoolHandle, DescriptorSetLayoutDesc,
    DescriptorSetLayoutEntry, DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite,
    FramebufferHandle, FrontFace, GpuResourceAllocator, GraphicsPipelineDesc, ImageLayout, LoadOp,
    PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle, PolygonMode, PrimitiveTopology,
    RenderPassDesc, RenderPassHandle, Resource, ShaderModuleDesc, ShaderProgram, ShaderStage,
    ShaderStages, StoreOp, TextureFormat, VertexAttribute, VertexBufferLayout, VertexFormat,
    VertexStepMode,
};
use crate::recording::Recording;
use crate::ring::{element_offset, BufferBinding};
use crate::Result;

pub(crate) const GRADIENT_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// One color ramp pass over a band of gradient texture rows.
pub(crate) struct ColorRampPass {
    pub framebuffer: FramebufferHandle,
    pub flush_uniforms: BufferBinding,
    pub span_buffer: BufferHandle,
    pub first_span: u32,
    pub span_count: u32,
    pub rows_top: u32,
    pub rows_height: u32,
}

/// Draws one instanced quad per [`GradientSpan`], interpolating its two
/// colors across the span.
pub(crate) struct ColorRampPipeline {
    descriptor_set_layout: DescriptorSetLayoutHandle,
    pipeline_layout: PipelineLayoutHandle,
    render_pass: RenderPassHandle,
    pipeline: PipelineHandle,
}

impl ColorRampPipeline {
    pub(crate) fn new<A: GpuResourceAllocator>(allocator: &mut A) -> Result<Self> {
        let descriptor_set_layout =
            allocator.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                label: "color ramp",
                entries: smallvec![DescriptorSetLayoutEntry {
                    binding: binding::FLUSH_UNIFORM_BUFFER,
                    ty: DescriptorType::UniformBuffer,
                    stages: ShaderStages::VERTEX,
                }],
            })?;
        let pipeline_layout = allocator.create_pipeline_layout(&PipelineLayoutDesc {
            label: "color ramp",
            set_layouts: smallvec![descriptor_set_layout],
        })?;
        let render_pass = allocator.create_render_pass(&RenderPassDesc {
            label: "color ramp",
            attachments: smallvec![AttachmentDesc {
                format: GRADIENT_TEXTURE_FORMAT,
                load_op: LoadOp::DontCare,
                store_op: StoreOp::Store,
                layout: ImageLayout::ColorAttachment,
            }],
            color_attachments: smallvec![Some(0)],
            input_attachments: smallvec![],
            raster_order_attachment_access: false,
            self_dependency: None,
        })?;
        let vertex_module = allocator.create_shader_module(&ShaderModuleDesc {
            program: ShaderProgram::ColorRamp,
            stage: ShaderStage::Vertex,
            interlock_mode: None,
            fixed_function_color_blend: false,
        })?;
        let fragment_module = allocator.create_shader_module(&ShaderModuleDesc {
            program: ShaderProgram::ColorRamp,
            stage: ShaderStage::Fragment,
            interlock_mode: None,
            fixed_function_color_blend: false,
        })?;
        let pipeline = allocator.create_graphics_pipeline(&GraphicsPipelineDesc {
            label: "color ramp",
            layout: pipeline_layout,
            render_pass,
            vertex_module,
            fragment_module,
            specialization: smallvec![],
            vertex_buffers: smallvec![VertexBufferLayout {
                binding: 0,
                stride: size_of::<GradientSpan>() as u32,
                step_mode: VertexStepMode::Instance,
                attributes: smallvec![VertexAttribute {
                    location: 0,
                    format: VertexFormat::Uint32x4,
                    offset: 0,
                }],
            }],
            topology: PrimitiveTopology::TriangleStrip,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            color_targets: smallvec![None],
            raster_order_attachment_access: false,
        })?;
        // The modules are only needed to build the pipeline.
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

    /// Records the pass. The gradient texture must be in the color attachment layout.
    pub(crate) fn record<A: GpuResourceAllocator>(
        &self,
        allocator: &mut A,
        descriptor_pool: DescriptorPoolHandle,
        pass: &ColorRampPass,
        recording: &mut Recording,
    ) -> Result<()> {
        let set = allocator.allocate_descriptor_set(descriptor_pool, self.descriptor_set_layout)?;
        allocator.write_descriptor_set(
            set,
            &[DescriptorWrite::buffer(
                binding::FLUSH_UNIFORM_BUFFER,
                DescriptorType::UniformBuffer,
                pass.flush_uniforms.buffer,
                pass.flush_uniforms.offset,
                pass.flush_uniforms.size,
            )],
        )?;

        let rows = IntRect::new(
            0,
            pass.rows_top as i32,
            GRAD_TEXTURE_WIDTH as i32,
            (pass.rows_top + pass.rows_height) as i32,
        );
        recording.begin_render_pass(self.render_pass, pass.framebuffer, rows, &[]);
        recording.bind_pipeline(self.pipeline);
        recording.set_viewport_and_scissor(rows);
        recording.bind_vertex_buffers(
            0,
            &[(
                pass.span_buffer,
                element_offset::<GradientSpan>(pass.first_span),
            )],
        );
        recording.bind_descriptor_sets(self.pipeline_layout, 0, &[set], &[]);
        recording.draw(4, pass.span_count, 0, 0);
        recording.end_render_pass();
        Ok(())
    }
}
