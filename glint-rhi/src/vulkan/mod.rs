//! Vulkan backend for Glint RHI.
//! Implements CommandPoolDevice, CommandPool, CommandBuffer on top of ash.

use crate::{
    support, CommandBuffer, CommandBufferLevel, CommandPool, CommandPoolConfig, CommandPoolFlags,
    CommandPoolDevice,
};
use ash::vk;
use std::ffi::{c_char, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

pub struct VulkanPoolDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    device: Arc<ash::Device>,
    queue_family_index: u32,
}

impl VulkanPoolDevice {
    /// Create a Vulkan device using the first available physical device and a
    /// graphics/compute queue family. Set GLINT_VALIDATION=1 to request the
    /// Khronos validation layer (skipped with a warning when not installed).
    pub fn new() -> Result<Arc<Self>, String> {
        let entry = unsafe { ash::Entry::load().map_err(|e| e.to_string())? };
        let app_name = CString::new("Glint").unwrap();
        let engine_name = CString::new("Glint").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_2)
            .application_name(&app_name)
            .engine_name(&engine_name);

        let layers = Self::instance_layers(&entry)?;
        let layer_names_c: Vec<CString> = layers
            .iter()
            .map(|n| CString::new(n.as_str()).unwrap())
            .collect();
        let layer_ptrs: Vec<*const c_char> = layer_names_c.iter().map(|c| c.as_ptr()).collect();

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(|e| e.to_string())?
        };
        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|e| e.to_string())?
        };
        let physical_device = physical_devices
            .into_iter()
            .next()
            .ok_or("No Vulkan physical device found")?;
        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = queue_family_properties
            .iter()
            .position(|p| {
                p.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    || p.queue_flags.contains(vk::QueueFlags::COMPUTE)
            })
            .ok_or("No suitable queue family")? as u32;
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info));
        let device_raw = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| e.to_string())?
        };
        log::debug!(
            "VulkanPoolDevice ready (queue family {})",
            queue_family_index
        );
        Ok(Arc::new(Self {
            entry,
            instance,
            device: Arc::new(device_raw),
            queue_family_index,
        }))
    }

    /// Instance layers to enable, filtered to what the loader actually offers.
    fn instance_layers(entry: &ash::Entry) -> Result<Vec<String>, String> {
        let mut requested: Vec<String> = Vec::new();
        if std::env::var("GLINT_VALIDATION").map(|v| v == "1").unwrap_or(false) {
            requested.push(VALIDATION_LAYER.to_string());
        }
        let requested = support::dedupe(&requested);
        if requested.is_empty() {
            return Ok(requested);
        }
        let layer_props = unsafe {
            entry
                .enumerate_instance_layer_properties()
                .map_err(|e| e.to_string())?
        };
        let available: Vec<String> = layer_props
            .iter()
            .map(|p| support::name_from_raw(&p.layer_name))
            .collect();
        let missing = support::missing_names(&requested, &available);
        if !missing.is_empty() {
            log::warn!("instance layers not available, continuing without: {:?}", missing);
        }
        Ok(requested
            .into_iter()
            .filter(|l| !missing.contains(l))
            .collect())
    }

    /// Queue family the device was created with; use it in [`CommandPoolConfig`].
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// The ash device handle, for recording into a [`VulkanCommandBuffer`]
    /// inside a worker's recording callback.
    pub fn ash_device(&self) -> &Arc<ash::Device> {
        &self.device
    }
}

impl Drop for VulkanPoolDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanPoolDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanPoolDevice")
            .field("queue_family_index", &self.queue_family_index)
            .finish_non_exhaustive()
    }
}

fn pool_flags_to_vk(flags: CommandPoolFlags) -> vk::CommandPoolCreateFlags {
    let mut out = vk::CommandPoolCreateFlags::empty();
    if flags.contains(CommandPoolFlags::TRANSIENT) {
        out |= vk::CommandPoolCreateFlags::TRANSIENT;
    }
    if flags.contains(CommandPoolFlags::RESET_COMMAND_BUFFER) {
        out |= vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
    }
    out
}

fn level_to_vk(level: CommandBufferLevel) -> vk::CommandBufferLevel {
    match level {
        CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
        CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
    }
}

impl CommandPoolDevice for VulkanPoolDevice {
    fn create_command_pool(
        &self,
        config: &CommandPoolConfig,
    ) -> Result<Box<dyn CommandPool>, String> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(config.queue_family_index)
            .flags(pool_flags_to_vk(config.flags));
        let pool = unsafe {
            self.device
                .create_command_pool(&create_info, None)
                .map_err(|e| e.to_string())?
        };
        Ok(Box::new(VulkanCommandPool {
            device: Arc::clone(&self.device),
            pool,
        }))
    }
}

/// Owns a vk::CommandPool. Created, used, and destroyed on one thread; the
/// `Drop` destroy also reclaims any buffers still allocated from the pool.
pub struct VulkanCommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanCommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandPool").finish()
    }
}

impl CommandPool for VulkanCommandPool {
    fn allocate(
        &mut self,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<Box<dyn CommandBuffer>>, String> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level_to_vk(level))
            .command_buffer_count(count);
        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| e.to_string())?
        };
        Ok(buffers
            .into_iter()
            .map(|b| Box::new(VulkanCommandBuffer { buffer: b }) as Box<dyn CommandBuffer>)
            .collect())
    }

    fn free(&mut self, buffers: Vec<Box<dyn CommandBuffer>>) {
        let raw: Vec<vk::CommandBuffer> = buffers
            .iter()
            .filter_map(|b| {
                b.as_any()
                    .downcast_ref::<VulkanCommandBuffer>()
                    .map(|vb| vb.buffer)
            })
            .collect();
        if raw.len() != buffers.len() {
            log::warn!(
                "free: skipped {} non-Vulkan command buffers",
                buffers.len() - raw.len()
            );
        }
        if raw.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &raw);
        }
    }
}

/// Wraps a vk::CommandBuffer. Carries no `Drop`: the buffer is returned to its
/// pool by the owning thread, or reclaimed when the pool is destroyed.
pub struct VulkanCommandBuffer {
    buffer: vk::CommandBuffer,
}

impl VulkanCommandBuffer {
    /// Raw handle for recording. Only valid on the thread that owns the pool.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandBuffer").finish()
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
