//! Vulkan device context, created through the compositor runtime so
//! the session and the pipeline share one physical device.

use std::ffi::CString;

use ash::vk::Handle;
use ash::{vk, Entry as VkEntry};
use openxr as xr;
use tracing::{info, warn};

use stereopass_core::{Error, Result};

/// Swapchain formats in preference order. sRGB first so the runtime
/// applies gamma; UNORM accepted as a fallback.
const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8A8_UNORM,
];

/// Pick the first preferred format the runtime offers. Startup fails
/// when none matches; uploading into an unknown layout would only
/// produce garbage colour.
pub fn select_swapchain_format(available: &[u32]) -> Result<vk::Format> {
    PREFERRED_FORMATS
        .iter()
        .copied()
        .find(|f| available.contains(&(f.as_raw() as u32)))
        .ok_or_else(|| Error::compositor("no supported swapchain color format"))
}

/// Memory-type selection over the device's advertised types.
///
/// Returns the chosen index and whether it satisfied the requested
/// property flags exactly; when no ideal type exists the first type
/// compatible with `type_bits` is used instead.
pub fn select_memory_type(
    types: &[vk::MemoryPropertyFlags],
    type_bits: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Option<(u32, bool)> {
    for (i, flags) in types.iter().enumerate() {
        if (type_bits & (1 << i)) != 0 && flags.contains(wanted) {
            return Some((i as u32, true));
        }
    }
    for i in 0..types.len() {
        if (type_bits & (1 << i)) != 0 {
            return Some((i as u32, false));
        }
    }
    None
}

fn parse_extension_list(list: &str) -> Vec<CString> {
    list.split_whitespace()
        .filter(|s| !s.is_empty())
        .map(|s| CString::new(s).unwrap())
        .collect()
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .enumerate()
        .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(idx, _)| idx as u32)
        .ok_or_else(|| Error::gpu("no graphics queue family"))
}

/// Device handles, queue and one-shot command machinery shared by the
/// upload and composite stages. Passed by reference into each stage;
/// nothing reads device state through globals.
pub struct VulkanContext {
    pub instance: ash::Instance,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    submit_fence: vk::Fence,
}

impl VulkanContext {
    /// Create instance, device and queue through the runtime's Vulkan
    /// enable path so the compositor dictates the physical device.
    pub fn new(xr_instance: &xr::Instance, system: xr::SystemId) -> Result<Self> {
        let entry =
            unsafe { VkEntry::load() }.map_err(|e| Error::gpu(format!("Vulkan entry load: {e}")))?;

        let reqs = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(|e| Error::compositor(format!("Vulkan requirements: {e:?}")))?;
        let api_version = vk::make_api_version(
            0,
            reqs.min_api_version_supported.major() as u32,
            reqs.min_api_version_supported.minor() as u32,
            reqs.min_api_version_supported.patch(),
        );

        let instance_exts = xr_instance
            .vulkan_legacy_instance_extensions(system)
            .map_err(|e| Error::compositor(format!("Vulkan instance extensions: {e:?}")))?;
        let instance_exts = parse_extension_list(&instance_exts);
        let instance_ext_ptrs: Vec<*const i8> = instance_exts.iter().map(|s| s.as_ptr()).collect();

        let app_name = CString::new("Stereopass").unwrap();
        let engine_name = CString::new("Stereopass").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&engine_name)
            .api_version(api_version);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_ext_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| Error::gpu(format!("Vulkan instance create: {e}")))?
        };

        let physical_device = unsafe {
            xr_instance.vulkan_graphics_device(system, instance.handle().as_raw() as *const _)
        }
        .map_err(|e| Error::compositor(format!("Vulkan graphics device: {e:?}")))?;
        let physical_device = vk::PhysicalDevice::from_raw(physical_device as u64);

        let queue_family_index = find_graphics_queue_family(&instance, physical_device)?;

        let device_exts = xr_instance
            .vulkan_legacy_device_extensions(system)
            .map_err(|e| Error::compositor(format!("Vulkan device extensions: {e:?}")))?;
        let device_exts = parse_extension_list(&device_exts);
        let device_ext_ptrs: Vec<*const i8> = device_exts.iter().map(|s| s.as_ptr()).collect();

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);

        let device_create = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&device_ext_ptrs);

        let device = unsafe {
            instance
                .create_device(physical_device, &device_create, None)
                .map_err(|e| Error::gpu(format!("Vulkan device create: {e}")))?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            device
                .create_command_pool(&command_pool_info, None)
                .map_err(|e| Error::gpu(format!("Vulkan command pool create: {e}")))?
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&command_buffer_info)
                .map_err(|e| Error::gpu(format!("Vulkan command buffer alloc: {e}")))?
        }[0];

        let fence_info = vk::FenceCreateInfo::builder();
        let submit_fence = unsafe {
            device
                .create_fence(&fence_info, None)
                .map_err(|e| Error::gpu(format!("Vulkan fence create: {e}")))?
        };

        info!(queue_family_index, "Vulkan device ready");

        Ok(Self {
            instance,
            device,
            physical_device,
            queue,
            queue_family_index,
            command_pool,
            command_buffer,
            submit_fence,
        })
    }

    /// Memory-type lookup with the compatible-type fallback; the
    /// fallback is logged as a warning, not fatal.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        wanted: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        let mem = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        let types: Vec<vk::MemoryPropertyFlags> = mem.memory_types
            [..mem.memory_type_count as usize]
            .iter()
            .map(|t| t.property_flags)
            .collect();
        match select_memory_type(&types, type_bits, wanted) {
            Some((index, true)) => Ok(index),
            Some((index, false)) => {
                warn!(index, ?wanted, "no ideal memory type, using first compatible");
                Ok(index)
            }
            None => Err(Error::gpu(format!(
                "no compatible memory type for bits {type_bits:#x}"
            ))),
        }
    }

    /// Record one command sequence, submit it, and block until the GPU
    /// finishes. Every upload and composite goes through here; the
    /// synchronous wait is the intended simplicity/latency trade-off.
    pub fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| Error::gpu(format!("Vulkan reset command buffer: {e}")))?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| Error::gpu(format!("Vulkan begin command buffer: {e}")))?;

            record(&self.device, self.command_buffer);

            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| Error::gpu(format!("Vulkan end command buffer: {e}")))?;

            self.device
                .reset_fences(&[self.submit_fence])
                .map_err(|e| Error::gpu(format!("Vulkan fence reset: {e}")))?;

            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(std::slice::from_ref(&self.command_buffer));
            self.device
                .queue_submit(
                    self.queue,
                    std::slice::from_ref(&submit_info),
                    self.submit_fence,
                )
                .map_err(|e| Error::gpu(format!("Vulkan queue submit: {e}")))?;

            self.device
                .wait_for_fences(&[self.submit_fence], true, u64::MAX)
                .map_err(|e| Error::gpu(format!("Vulkan fence wait: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if self.submit_fence != vk::Fence::null() {
                self.device.destroy_fence(self.submit_fence, None);
            }
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool, None);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_format_preferred_when_available() {
        let available = [
            vk::Format::B8G8R8A8_UNORM.as_raw() as u32,
            vk::Format::R8G8B8A8_SRGB.as_raw() as u32,
        ];
        assert_eq!(
            select_swapchain_format(&available).unwrap(),
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn unorm_accepted_as_fallback() {
        let available = [vk::Format::B8G8R8A8_UNORM.as_raw() as u32];
        assert_eq!(
            select_swapchain_format(&available).unwrap(),
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn unsupported_format_set_is_fatal() {
        let available = [vk::Format::R16G16B16A16_SFLOAT.as_raw() as u32];
        assert!(select_swapchain_format(&available).is_err());
    }

    #[test]
    fn memory_type_prefers_exact_match() {
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ];
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(select_memory_type(&types, 0b11, wanted), Some((1, true)));
    }

    #[test]
    fn memory_type_falls_back_to_first_compatible() {
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ];
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(select_memory_type(&types, 0b10, wanted), Some((1, false)));
    }

    #[test]
    fn memory_type_respects_type_bits() {
        let types = [vk::MemoryPropertyFlags::HOST_VISIBLE];
        assert_eq!(
            select_memory_type(&types, 0b0, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}
