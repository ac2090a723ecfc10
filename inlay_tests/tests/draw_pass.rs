// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command streams recorded by whole flushes.

use inlay::encoding::{
    patch_base_index, patch_index_count, TESS_SPAN_INDICES, TESS_TEXTURE_WIDTH,
};
use inlay::peniko::Color;
use inlay::{
    ClearValue, Command, DeviceFeatures, DrawBatch, DrawType, FlushDescriptor, ImageLayout,
    IntRect, InterlockMode, PolygonMode, Recording, ResourceKind, TextureFormat, TextureUsages,
};
use inlay_tests::{
    command_names, context, count_commands, prepare_frame, render_target, TestParams,
};

#[test]
fn raster_ordered_clear_and_draw() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 4)];
    let mut desc = FlushDescriptor::new(&target, &batches);
    desc.clear_color = Color::WHITE;
    desc.tess_vertex_span_count = 4;
    desc.tess_data_height = 2;

    let mut first = Recording::default();
    context.flush(&desc, &mut first).unwrap();
    // The null image is uploaded and the PLS planes created on first use.
    assert_eq!(count_commands(&first, "copy_buffer_to_image"), 1);
    assert_eq!(count_commands(&first, "image_barrier"), 10);

    let mut second = Recording::default();
    context.flush(&desc, &mut second).unwrap();
    assert_eq!(
        command_names(&second),
        [
            // Gradient texture, with no ramps to render or copy.
            "image_barrier",
            "image_barrier",
            "image_barrier",
            // Tessellation.
            "image_barrier",
            "begin_render_pass",
            "bind_pipeline",
            "set_viewport",
            "set_scissor",
            "bind_vertex_buffers",
            "bind_index_buffer",
            "bind_descriptor_sets",
            "draw_indexed",
            "end_render_pass",
            "image_barrier",
            // Draw.
            "begin_render_pass",
            "set_viewport",
            "set_scissor",
            "bind_descriptor_sets",
            "bind_pipeline",
            "bind_vertex_buffers",
            "bind_index_buffer",
            "draw_indexed",
            "end_render_pass",
        ]
    );
    let Some(Command::ImageBarrier(barrier)) = second.commands.get(13) else {
        panic!("expected the tessellation texture barrier");
    };
    assert_eq!(barrier.old_layout, ImageLayout::ColorAttachment);
    assert_eq!(barrier.new_layout, ImageLayout::ShaderReadOnly);
    assert_eq!(
        second.commands[11],
        Command::DrawIndexed {
            index_count: TESS_SPAN_INDICES.len() as u32,
            instance_count: 4,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    );
    let Some(Command::BeginRenderPass { clear_values, .. }) = second.commands.get(14) else {
        panic!("expected the draw pass");
    };
    assert_eq!(clear_values[0], ClearValue::Color([1.0; 4]));
    assert_eq!(clear_values[2], ClearValue::None);
    assert_eq!(
        second.commands[21],
        Command::DrawIndexed {
            index_count: patch_index_count(DrawType::MidpointFanPatches),
            instance_count: 4,
            first_index: patch_base_index(DrawType::MidpointFanPatches),
            base_vertex: 0,
            first_instance: 0,
        }
    );
}

#[test]
fn tessellation_finishes_before_the_draw_pass() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::OuterCurvePatches, 1)];
    let mut desc = FlushDescriptor::new(&target, &batches);
    desc.tess_vertex_span_count = 4;
    desc.tess_data_height = 2;
    let mut recording = Recording::default();
    context.flush(&desc, &mut recording).unwrap();

    let areas: Vec<_> = recording
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::BeginRenderPass { area, .. } => Some(*area),
            _ => None,
        })
        .collect();
    assert_eq!(
        areas,
        [
            IntRect::from_size(TESS_TEXTURE_WIDTH, 2),
            IntRect::from_size(32, 32)
        ]
    );
    let tess_end = recording
        .commands
        .iter()
        .position(|command| *command == Command::EndRenderPass)
        .unwrap();
    assert!(matches!(
        &recording.commands[tess_end + 1],
        Command::ImageBarrier(barrier) if barrier.new_layout == ImageLayout::ShaderReadOnly
    ));
}

#[test]
fn empty_gradients_record_no_ramp_work() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let mut recording = Recording::default();
    context
        .flush(&FlushDescriptor::new(&target, &[]), &mut recording)
        .unwrap();
    let mut recording = Recording::default();
    context
        .flush(&FlushDescriptor::new(&target, &[]), &mut recording)
        .unwrap();
    assert_eq!(count_commands(&recording, "begin_render_pass"), 1);
    assert_eq!(count_commands(&recording, "copy_buffer_to_image"), 0);
    assert_eq!(count_commands(&recording, "draw"), 0);
}

#[test]
fn depth_stencil_flushes_are_skipped() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 4)];
    let mut desc = FlushDescriptor::new(&target, &batches);
    desc.interlock_mode = InterlockMode::DepthStencil;
    let mut recording = Recording::default();
    context.flush(&desc, &mut recording).unwrap();
    assert!(recording.is_empty());
    assert_eq!(context.draw_pipeline_count(), 0);
}

#[test]
fn render_target_formats_get_their_own_pipelines() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let rgba = render_target(&mut context, &params).unwrap();
    let bgra = render_target(
        &mut context,
        &TestParams {
            format: TextureFormat::Bgra8Unorm,
            ..TestParams::new(32, 32)
        },
    )
    .unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::InteriorTriangulation, 3)];

    for target in [&rgba, &bgra, &rgba, &bgra] {
        context
            .flush(&FlushDescriptor::new(target, &batches), &mut Recording::default())
            .unwrap();
    }
    assert_eq!(context.draw_pipeline_count(), 2);
    assert_eq!(context.draw_shader_count(), 1);
}

#[test]
fn wireframe_needs_non_solid_fill() {
    let params = TestParams {
        features: DeviceFeatures {
            fill_mode_non_solid: false,
            ..DeviceFeatures::all()
        },
        ..TestParams::new(32, 32)
    };
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 1)];
    let mut desc = FlushDescriptor::new(&target, &batches);
    context.flush(&desc, &mut Recording::default()).unwrap();
    desc.wireframe = true;
    context.flush(&desc, &mut Recording::default()).unwrap();
    assert_eq!(context.draw_pipeline_count(), 1);
}

#[test]
fn wireframe_pipelines_draw_lines() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let batches = [DrawBatch::new(DrawType::MidpointFanPatches, 1)];
    let mut desc = FlushDescriptor::new(&target, &batches);
    desc.wireframe = true;
    let mut recording = Recording::default();
    context.flush(&desc, &mut recording).unwrap();
    let Some(Command::BindPipeline(pipeline)) = recording
        .commands
        .iter()
        .find(|command| matches!(command, Command::BindPipeline(_)))
    else {
        panic!("no pipeline bound");
    };
    let pipeline = context.allocator().pipeline_desc(*pipeline).unwrap();
    assert_eq!(pipeline.polygon_mode, PolygonMode::Line);
}

#[test]
fn offscreen_color_is_created_for_unreadable_targets() {
    let params = TestParams {
        target_usage: TextureUsages::COLOR_ATTACHMENT,
        ..TestParams::new(32, 32)
    };
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let textures = context.allocator().live_count(ResourceKind::Texture);
    let mut recording = Recording::default();
    context
        .flush(&FlushDescriptor::new(&target, &[]), &mut recording)
        .unwrap();
    // Offscreen color, clip, scratch color and coverage.
    assert_eq!(
        context.allocator().live_count(ResourceKind::Texture),
        textures + 4
    );
    // Cleared, so only copied out.
    assert_eq!(count_commands(&recording, "blit_sub_rect"), 1);
}
