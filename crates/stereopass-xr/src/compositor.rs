//! Eye compositor stage: scale and center one eye texture into the
//! compositor-managed surface for that eye.

use ash::vk;

use stereopass_core::Result;

use crate::resources::{color_subresource_layers, color_subresource_range, EyeTexture};
use crate::vulkan::VulkanContext;

/// Centering offset along one axis: `(surface - content) / 2` with
/// floor division. Negative when the surface is smaller than the
/// content; the blit rectangle clamps it (see [`centered_dest_rect`]).
pub fn centering_offset(surface: u32, content: u32) -> i32 {
    (surface as i64 - content as i64).div_euclid(2) as i32
}

/// Destination rectangle for the blit: the content extent centered in
/// the surface, clamped to the surface bounds. When the surface is
/// smaller than the content the image is shrunk to fit rather than
/// relying on driver-defined clipping.
pub fn centered_dest_rect(
    surface: vk::Extent2D,
    content: vk::Extent2D,
) -> (vk::Offset3D, vk::Offset3D) {
    let off_x = centering_offset(surface.width, content.width);
    let off_y = centering_offset(surface.height, content.height);
    let x0 = off_x.max(0);
    let y0 = off_y.max(0);
    let x1 = (off_x + content.width as i32).min(surface.width as i32);
    let y1 = (off_y + content.height as i32).min(surface.height as i32);
    (
        vk::Offset3D { x: x0, y: y0, z: 0 },
        vk::Offset3D { x: x1, y: y1, z: 1 },
    )
}

/// Blit the full eye texture extent into the centered sub-rectangle of
/// the surface image, bracketed by its own submit/wait.
///
/// The surface arrives in undefined layout (its previous contents are
/// fully overwritten each tick) and leaves color-attachment-ready; the
/// eye texture is returned to shader-readable. A texture that has
/// never been uploaded is skipped, leaving a cleared surface.
pub fn composite_eye(
    ctx: &VulkanContext,
    texture: &mut EyeTexture,
    surface_image: vk::Image,
    surface_extent: vk::Extent2D,
) -> Result<()> {
    let has_content = texture.has_content();
    let content_extent = texture.extent();
    let texture_image = texture.image();
    let texture_layout = texture.layout();
    let (dst0, dst1) = centered_dest_rect(surface_extent, content_extent);

    ctx.one_shot(|device, cmd| unsafe {
        let surface_to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .image(surface_image)
            .subresource_range(color_subresource_range());
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&surface_to_transfer),
        );

        // Letterbox borders around the centered content.
        let black = vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        };
        device.cmd_clear_color_image(
            cmd,
            surface_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &black,
            std::slice::from_ref(&color_subresource_range()),
        );

        if has_content {
            let texture_to_src = vk::ImageMemoryBarrier::builder()
                .old_layout(texture_layout)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .image(texture_image)
                .subresource_range(color_subresource_range());
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&texture_to_src),
            );

            let blit = vk::ImageBlit::builder()
                .src_subresource(color_subresource_layers())
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: content_extent.width as i32,
                        y: content_extent.height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(color_subresource_layers())
                .dst_offsets([dst0, dst1]);
            device.cmd_blit_image(
                cmd,
                texture_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                surface_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                vk::Filter::LINEAR,
            );

            let texture_to_shader_read = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .image(texture_image)
                .subresource_range(color_subresource_range());
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&texture_to_shader_read),
            );
        }

        let surface_to_attachment = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .image(surface_image)
            .subresource_range(color_subresource_range());
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&surface_to_attachment),
        );
    })?;

    if has_content {
        texture.set_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centering_matches_known_display_geometry() {
        // 1600x1200 eye content in a 2468x2740 surface.
        assert_eq!(centering_offset(2468, 1600), 434);
        assert_eq!(centering_offset(2740, 1200), 770);
    }

    #[test]
    fn centering_is_floor_division() {
        assert_eq!(centering_offset(5, 2), 1);
        assert_eq!(centering_offset(2, 5), -2);
    }

    #[test]
    fn dest_rect_centers_content() {
        let (d0, d1) = centered_dest_rect(
            vk::Extent2D {
                width: 2468,
                height: 2740,
            },
            vk::Extent2D {
                width: 1600,
                height: 1200,
            },
        );
        assert_eq!((d0.x, d0.y), (434, 770));
        assert_eq!((d1.x, d1.y), (434 + 1600, 770 + 1200));
    }

    #[test]
    fn dest_rect_clamps_to_small_surface() {
        let (d0, d1) = centered_dest_rect(
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            vk::Extent2D {
                width: 1600,
                height: 1200,
            },
        );
        assert_eq!((d0.x, d0.y), (0, 0));
        assert_eq!((d1.x, d1.y), (800, 600));
    }
}
