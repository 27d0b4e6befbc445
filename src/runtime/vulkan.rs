//! The Vulkan device the OpenXR session runs on.
//!
//! The renderer draws with wgpu on its own device, so eye pixels are copied
//! into the runtime's swapchain images through a host-visible staging buffer.
//! Each upload waits for its own fence: the image must be written before the
//! swapchain image is released back to the runtime.

use std::ffi::{CString, c_char};

use ash::vk;
use ash::vk::Handle;
use openxr as xr;

const UPLOAD_TIMEOUT_NS: u64 = 1_000_000_000;

/// Failure talking to OpenXR or Vulkan.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to load {0}")]
    Load(String),
    #[error("{context}: {result}")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },
    #[error("{context}: {result}")]
    Xr {
        context: &'static str,
        result: xr::sys::Result,
    },
    #[error("{0}")]
    Unsupported(&'static str),
}

pub trait WithContext<T> {
    fn context(self, context: &'static str) -> Result<T, BackendError>;
}

impl<T> WithContext<T> for Result<T, vk::Result> {
    fn context(self, context: &'static str) -> Result<T, BackendError> {
        self.map_err(|result| BackendError::Vulkan { context, result })
    }
}

impl<T> WithContext<T> for Result<T, xr::sys::Result> {
    fn context(self, context: &'static str) -> Result<T, BackendError> {
        self.map_err(|result| BackendError::Xr { context, result })
    }
}

struct Staging {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

pub struct VulkanUploader {
    // Keeps the Vulkan library loaded for as long as the handles live.
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    staging: Option<Staging>,
}

impl VulkanUploader {
    /// Creates a Vulkan instance and device that satisfy the runtime's
    /// requirements for `system`.
    pub fn new(xr_instance: &xr::Instance, system: xr::SystemId) -> Result<Self, BackendError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::Load(format!("Vulkan: {e}")))?;

        let requirements = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .context("OpenXR Vulkan requirements")?;
        let min = requirements.min_api_version_supported;
        let api_version = vk::make_api_version(0, min.major() as u32, min.minor() as u32, min.patch());

        let instance_exts = xr_instance
            .vulkan_legacy_instance_extensions(system)
            .context("OpenXR Vulkan instance extensions")?;
        let instance_exts = parse_extension_list(&instance_exts);
        let instance_ext_ptrs: Vec<*const c_char> =
            instance_exts.iter().map(|s| s.as_ptr()).collect();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(c"pointvr")
            .engine_name(c"pointvr")
            .api_version(api_version);
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_ext_ptrs);
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("Vulkan instance")?;

        let physical_device = unsafe {
            xr_instance.vulkan_graphics_device(system, instance.handle().as_raw() as *const _)
        }
        .context("OpenXR Vulkan graphics device")?;
        let physical_device = vk::PhysicalDevice::from_raw(physical_device as u64);

        let queue_family_index = find_graphics_queue_family(&instance, physical_device)
            .ok_or(BackendError::Unsupported("no Vulkan graphics queue family"))?;

        let device_exts = xr_instance
            .vulkan_legacy_device_extensions(system)
            .context("OpenXR Vulkan device extensions")?;
        let device_exts = parse_extension_list(&device_exts);
        let device_ext_ptrs: Vec<*const c_char> = device_exts.iter().map(|s| s.as_ptr()).collect();

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)
            .build();
        let device_create = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&device_ext_ptrs);
        let device = unsafe { instance.create_device(physical_device, &device_create, None) }
            .context("Vulkan device")?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None) }
            .context("Vulkan command pool")?;

        let command_buffer_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&command_buffer_info) }
            .context("Vulkan command buffer")?[0];

        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let fence =
            unsafe { device.create_fence(&fence_info, None) }.context("Vulkan upload fence")?;

        log::info!("Vulkan device for OpenXR ready (queue family {queue_family_index})");

        Ok(Self {
            _entry: entry,
            instance,
            device,
            physical_device,
            queue,
            queue_family_index,
            command_pool,
            command_buffer,
            fence,
            staging: None,
        })
    }

    pub fn session_create_info(&self) -> xr::vulkan::SessionCreateInfo {
        xr::vulkan::SessionCreateInfo {
            instance: self.instance.handle().as_raw() as *const _,
            physical_device: self.physical_device.as_raw() as *const _,
            device: self.device.handle().as_raw() as *const _,
            queue_family_index: self.queue_family_index,
            queue_index: 0,
        }
    }

    fn ensure_staging(&mut self, size: vk::DeviceSize) -> Result<vk::DeviceMemory, BackendError> {
        if let Some(staging) = &self.staging {
            if staging.size >= size {
                return Ok(staging.memory);
            }
        }
        self.release_staging();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .context("Vulkan staging buffer")?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let Some(memory_type_index) = find_memory_type(
            &self.instance,
            self.physical_device,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(BackendError::Unsupported("no host-visible Vulkan memory type"));
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(result) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(BackendError::Vulkan {
                    context: "Vulkan staging memory",
                    result,
                });
            }
        };
        self.staging = Some(Staging {
            buffer,
            memory,
            size,
        });
        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            self.release_staging();
            return Err(BackendError::Vulkan {
                context: "Vulkan bind staging memory",
                result,
            });
        }
        Ok(memory)
    }

    fn release_staging(&mut self) {
        if let Some(staging) = self.staging.take() {
            unsafe {
                self.device.destroy_buffer(staging.buffer, None);
                self.device.free_memory(staging.memory, None);
            }
        }
    }

    /// Copies tightly packed RGBA8 `pixels` into `image` and leaves it in
    /// `COLOR_ATTACHMENT_OPTIMAL`, the layout the runtime expects on release.
    /// Returns the image's new layout.
    pub fn upload(
        &mut self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<vk::ImageLayout, BackendError> {
        let size = width as vk::DeviceSize * height as vk::DeviceSize * 4;
        if size == 0 {
            return Ok(old_layout);
        }
        if (pixels.len() as vk::DeviceSize) < size {
            return Err(BackendError::Unsupported("eye pixels are smaller than the swapchain image"));
        }

        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, UPLOAD_TIMEOUT_NS)
                .context("Vulkan upload fence wait")?;
        }
        let memory = self.ensure_staging(size)?;
        let Some(staging_buffer) = self.staging.as_ref().map(|s| s.buffer) else {
            return Err(BackendError::Unsupported("staging buffer missing"));
        };

        unsafe {
            let ptr = self
                .device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                .context("Vulkan map staging memory")?;
            std::ptr::copy_nonoverlapping(pixels.as_ptr(), ptr.cast::<u8>(), size as usize);
            self.device.unmap_memory(memory);

            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Vulkan reset command buffer")?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .context("Vulkan begin command buffer")?;

            let subresource_range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };

            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(old_layout)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .image(image)
                .subresource_range(subresource_range)
                .build();
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_transfer),
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                })
                .build();
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                staging_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );

            let to_color = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .image(image)
                .subresource_range(subresource_range)
                .build();
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_color),
            );

            self.device
                .end_command_buffer(self.command_buffer)
                .context("Vulkan end command buffer")?;

            self.device
                .reset_fences(&[self.fence])
                .context("Vulkan upload fence reset")?;
            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(std::slice::from_ref(&self.command_buffer))
                .build();
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit_info), self.fence)
                .context("Vulkan queue submit")?;
            self.device
                .wait_for_fences(&[self.fence], true, UPLOAD_TIMEOUT_NS)
                .context("Vulkan upload")?;
        }

        Ok(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
    }
}

impl Drop for VulkanUploader {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.release_staging();
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Splits the runtime's space-separated extension list.
fn parse_extension_list(list: &str) -> Vec<CString> {
    list.split_whitespace()
        .filter_map(|name| CString::new(name).ok())
        .collect()
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

fn find_memory_type(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    (0..memory.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && memory.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}
