// Copyright 2024 the Inlay Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use inlay::{
    mip_level_count, Command, DrawBatch, DrawType, FlushDescriptor, ImageLayout, InterlockMode,
    Recording,
};
use inlay_tests::{context, count_commands, prepare_frame, render_target, TestParams};

#[test]
fn mip_chains_reach_one_texel() {
    assert_eq!(mip_level_count(1, 1), 1);
    assert_eq!(mip_level_count(300, 200), 9);
    assert_eq!(mip_level_count(256, 1), 9);
    assert_eq!(mip_level_count(257, 3), 9);
}

#[test]
fn images_upload_on_their_first_draw() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    let target = render_target(&mut context, &params).unwrap();
    prepare_frame(&mut context).unwrap();
    let image = context.make_image_texture(8, 4, &[200; 8 * 4 * 4]).unwrap();
    assert_eq!(image.mip_level_count(), 4);
    assert!(image.has_pending_upload());

    let mut batch = DrawBatch::new(DrawType::ImageRect, 1);
    batch.image_texture = Some(&image);
    let batches = [batch];
    let mut desc = FlushDescriptor::new(&target, &batches);
    desc.interlock_mode = InterlockMode::Atomics;

    let mut recording = Recording::default();
    context.flush(&desc, &mut recording).unwrap();
    assert!(!image.has_pending_upload());
    assert_eq!(count_commands(&recording, "blit_mip_level"), 3);
    // Every level ends up readable before the draw pass samples it.
    let readable_levels: u32 = recording
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::ImageBarrier(barrier)
                if barrier.texture == image.texture()
                    && barrier.new_layout == ImageLayout::ShaderReadOnly =>
            {
                Some(barrier.mip_level_count)
            }
            _ => None,
        })
        .sum();
    assert_eq!(readable_levels, 4);

    let mut recording = Recording::default();
    context.flush(&desc, &mut recording).unwrap();
    assert_eq!(count_commands(&recording, "blit_mip_level"), 0);
}

#[test]
fn undecodable_images_are_none() {
    let params = TestParams::new(32, 32);
    let mut context = context(&params).unwrap();
    assert!(context
        .decode_image_texture(b"definitely not a png")
        .unwrap()
        .is_none());
}
