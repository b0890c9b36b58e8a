//! RAII owners for the pipeline's GPU resources.
//!
//! Each owner holds its own device handle clone and releases in
//! `Drop`, null-guarded, so teardown is safe after a partial
//! initialization and idempotent under repeated drops of the
//! containing pipeline.

use ash::vk;
use tracing::debug;

use stereopass_core::{Error, Result};

use crate::vulkan::VulkanContext;

/// Host-visible, persistently mapped buffer sized for exactly one
/// converted eye image. Reused every tick for both eyes, strictly
/// serialized, never accessed concurrently.
pub struct StagingBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: usize,
}

impl StagingBuffer {
    pub fn new(ctx: &VulkanContext, size: usize) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            ctx.device
                .create_buffer(&buffer_info, None)
                .map_err(|e| Error::gpu(format!("staging buffer create: {e}")))?
        };

        let req = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = ctx.find_memory_type(
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(req.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe {
            ctx.device
                .allocate_memory(&alloc_info, None)
                .map_err(|e| Error::gpu(format!("staging memory alloc: {e}")))?
        };
        unsafe {
            ctx.device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| Error::gpu(format!("staging bind memory: {e}")))?;
        }

        let mapped = unsafe {
            ctx.device
                .map_memory(memory, 0, size as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(|e| Error::gpu(format!("staging map memory: {e}")))?
        }
        .cast::<u8>();

        debug!(size, "staging buffer created and mapped");

        Ok(Self {
            device: ctx.device.clone(),
            buffer,
            memory,
            mapped,
            size,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The persistently mapped host view. Host-coherent memory, so no
    /// explicit flush is needed before submission.
    pub fn mapped_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped, self.size) }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        unsafe {
            if !self.mapped.is_null() {
                self.device.unmap_memory(self.memory);
                self.mapped = std::ptr::null_mut();
            }
            if self.buffer != vk::Buffer::null() {
                self.device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }
}

/// Device-local image holding the latest converted camera frame for
/// one eye. Fixed resolution for the process lifetime; written only by
/// the upload stage and read only by the composite stage, with layout
/// transitions enforcing the ordering.
pub struct EyeTexture {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
}

impl EyeTexture {
    pub fn new(ctx: &VulkanContext, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED,
            )
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe {
            ctx.device
                .create_image(&image_info, None)
                .map_err(|e| Error::gpu(format!("eye texture create: {e}")))?
        };

        let req = unsafe { ctx.device.get_image_memory_requirements(image) };
        let memory_type_index =
            ctx.find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(req.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe {
            ctx.device
                .allocate_memory(&alloc_info, None)
                .map_err(|e| Error::gpu(format!("eye texture memory alloc: {e}")))?
        };
        unsafe {
            ctx.device
                .bind_image_memory(image, memory, 0)
                .map_err(|e| Error::gpu(format!("eye texture bind memory: {e}")))?;
        }

        debug!(width = extent.width, height = extent.height, "eye texture created");

        Ok(Self {
            device: ctx.device.clone(),
            image,
            memory,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// True once the first upload has landed; before that the image
    /// contents are undefined and must not be blitted.
    pub fn has_content(&self) -> bool {
        self.layout != vk::ImageLayout::UNDEFINED
    }
}

impl Drop for EyeTexture {
    fn drop(&mut self) {
        unsafe {
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }
}

/// Subresource range shared by every barrier in the pipeline: single
/// mip, single layer, color aspect.
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}
