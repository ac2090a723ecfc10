// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use inlay_encoding::IntRect;
use smallvec::SmallVec;

use crate::hal::{
    BufferHandle, DescriptorSetHandle, FilterMode, FramebufferHandle, ImageLayout, IndexFormat,
    MemoryBarrier, PipelineHandle, PipelineLayoutHandle, RenderPassHandle, TextureHandle,
};

/// List of [`Command`]s for the embedder to execute in order.
#[derive(Default)]
pub struct Recording {
    pub commands: Vec<Command>,
}

/// A layout transition of a range of mip levels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub texture: TextureHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    /// The attachment is not cleared, or its clear value doesn't matter.
    None,
    Color([f32; 4]),
    Uint([u32; 4]),
}

/// Single command inside a [`Recording`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ImageBarrier(ImageBarrier),
    MemoryBarrier(MemoryBarrier),
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        area: IntRect,
        /// One per framebuffer attachment.
        clear_values: SmallVec<[ClearValue; 4]>,
    },
    EndRenderPass,
    BindPipeline(PipelineHandle),
    SetViewport(IntRect),
    SetScissor(IntRect),
    BindVertexBuffers {
        first_binding: u32,
        /// Buffers and byte offsets.
        buffers: SmallVec<[(BufferHandle, u64); 2]>,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    BindDescriptorSets {
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: SmallVec<[DescriptorSetHandle; 4]>,
        dynamic_offsets: SmallVec<[u32; 1]>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    /// Copies tightly packed rows, `row_length` texels apart, into mip level 0.
    CopyBufferToImage {
        buffer: BufferHandle,
        offset: u64,
        row_length: u32,
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    /// Filtered blit of one whole mip level into another.
    BlitMipLevel {
        texture: TextureHandle,
        src_level: u32,
        dst_level: u32,
        src_size: (u32, u32),
        dst_size: (u32, u32),
        filter: FilterMode,
    },
    /// Unfiltered copy of the same rectangle between two textures.
    BlitSubRect {
        src: TextureHandle,
        dst: TextureHandle,
        rect: IntRect,
    },
    ClearColorImage {
        texture: TextureHandle,
        layout: ImageLayout,
        value: ClearValue,
    },
}

impl Command {
    /// Short name, for logging and command stream summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ImageBarrier(_) => "image_barrier",
            Self::MemoryBarrier(_) => "memory_barrier",
            Self::BeginRenderPass { .. } => "begin_render_pass",
            Self::EndRenderPass => "end_render_pass",
            Self::BindPipeline(_) => "bind_pipeline",
            Self::SetViewport(_) => "set_viewport",
            Self::SetScissor(_) => "set_scissor",
            Self::BindVertexBuffers { .. } => "bind_vertex_buffers",
            Self::BindIndexBuffer { .. } => "bind_index_buffer",
            Self::BindDescriptorSets { .. } => "bind_descriptor_sets",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw_indexed",
            Self::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Self::BlitMipLevel { .. } => "blit_mip_level",
            Self::BlitSubRect { .. } => "blit_sub_rect",
            Self::ClearColorImage { .. } => "clear_color_image",
        }
    }
}

impl Recording {
    /// Appends a [`Command`] to the back of the [`Recording`].
    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Transitions the base mip level of a texture.
    pub fn image_barrier(
        &mut self,
        texture: TextureHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        self.image_barrier_mips(texture, old_layout, new_layout, 0, 1);
    }

    pub fn image_barrier_mips(
        &mut self,
        texture: TextureHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        base_mip_level: u32,
        mip_level_count: u32,
    ) {
        self.push(Command::ImageBarrier(ImageBarrier {
            texture,
            old_layout,
            new_layout,
            base_mip_level,
            mip_level_count,
        }));
    }

    pub fn memory_barrier(&mut self, barrier: MemoryBarrier) {
        self.push(Command::MemoryBarrier(barrier));
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        area: IntRect,
        clear_values: &[ClearValue],
    ) {
        self.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            area,
            clear_values: clear_values.into(),
        });
    }

    pub fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(Command::BindPipeline(pipeline));
    }

    /// Sets both the viewport and the scissor to `rect`.
    pub fn set_viewport_and_scissor(&mut self, rect: IntRect) {
        self.push(Command::SetViewport(rect));
        self.push(Command::SetScissor(rect));
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(BufferHandle, u64)]) {
        self.push(Command::BindVertexBuffers {
            first_binding,
            buffers: buffers.into(),
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.push(Command::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    pub fn bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        self.push(Command::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.into(),
            dynamic_offsets: dynamic_offsets.into(),
        });
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }
}
