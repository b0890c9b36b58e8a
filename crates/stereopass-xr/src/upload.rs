//! Texture upload stage: one eye image into one GPU texture.

use ash::vk;

use stereopass_core::{Error, EyeImage, Result};

use crate::resources::{color_subresource_layers, color_subresource_range, EyeTexture, StagingBuffer};
use crate::vulkan::VulkanContext;

/// Convert one eye image to RGBA, stage it, and copy it into the eye
/// texture. Submits a one-shot command sequence and blocks until the
/// copy has finished; the staging buffer is free for the other eye as
/// soon as this returns.
///
/// Returns whether an upload actually happened: an empty eye image
/// (degenerate capture) is skipped and reported as `false` so the
/// caller does not count it.
pub fn upload_eye(
    ctx: &VulkanContext,
    staging: &mut StagingBuffer,
    texture: &mut EyeTexture,
    eye: &EyeImage<'_>,
) -> Result<bool> {
    if eye.is_empty() {
        return Ok(false);
    }
    let len = eye.rgba_len();
    if len > staging.size() {
        return Err(Error::gpu(format!(
            "eye image ({len} bytes) exceeds staging buffer ({} bytes)",
            staging.size()
        )));
    }

    eye.copy_rgba_into(&mut staging.mapped_slice()[..len]);

    let extent = texture.extent();
    let copy_extent = vk::Extent3D {
        width: eye.width().min(extent.width),
        height: eye.height().min(extent.height),
        depth: 1,
    };
    let old_layout = texture.layout();
    let image = texture.image();
    let buffer = staging.handle();

    ctx.one_shot(|device, cmd| unsafe {
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .image(image)
            .subresource_range(color_subresource_range());
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&to_transfer),
        );

        let region = vk::BufferImageCopy::builder()
            .image_subresource(color_subresource_layers())
            .image_extent(copy_extent);
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );

        let to_shader_read = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .image(image)
            .subresource_range(color_subresource_range());
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&to_shader_read),
        );
    })?;

    texture.set_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    Ok(true)
}
