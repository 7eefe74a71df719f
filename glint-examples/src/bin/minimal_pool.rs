//! Minimal runnable example: Glint + Vulkan only.
//! Creates a Vulkan device, spins up a command worker, records one command
//! buffer through it, releases it, and shuts the worker down.

use std::sync::Arc;

use glint_rhi::vulkan::{VulkanCommandBuffer, VulkanPoolDevice};
use glint_rhi::{CommandBufferLevel, CommandPoolConfig};
use glint_worker::{CommandWorker, Request};

fn main() {
    env_logger::init();

    let device = VulkanPoolDevice::new().expect("VulkanPoolDevice::new");
    let config = CommandPoolConfig {
        label: Some("minimal"),
        queue_family_index: device.queue_family_index(),
        ..Default::default()
    };
    let ash_device = Arc::clone(device.ash_device());
    let worker = CommandWorker::spawn(device, config).expect("CommandWorker::spawn");

    let reply = worker
        .submit(Request::Allocate {
            level: CommandBufferLevel::Primary,
            count: 1,
            record: Box::new(move |_, buffer| {
                let vk_buffer = buffer
                    .as_any()
                    .downcast_ref::<VulkanCommandBuffer>()
                    .ok_or("buffer is not a Vulkan command buffer")?;
                let begin_info = ash::vk::CommandBufferBeginInfo::default();
                unsafe {
                    ash_device
                        .begin_command_buffer(vk_buffer.raw(), &begin_info)
                        .map_err(|e| e.to_string())?;
                    ash_device
                        .end_command_buffer(vk_buffer.raw())
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }),
        })
        .expect("submit");
    let response = reply.recv().expect("response");
    response.allocation.expect("allocation");
    for outcome in &response.outcomes {
        outcome.as_ref().expect("recording");
    }

    let reply = worker
        .submit(Request::Release(response.buffers))
        .expect("submit release");
    reply.recv().expect("release response");

    let done = worker.shutdown().expect("shutdown");
    done.recv().expect("completion");
    println!("Glint pool worker OK");
}
