//! Several submitter threads sharing one command worker. Demonstrates the 1:1
//! thread-to-resource binding: any number of callers, one thread touching the
//! pool.

use std::sync::Arc;

use glint_rhi::vulkan::VulkanPoolDevice;
use glint_rhi::{CommandBufferLevel, CommandPoolConfig};
use glint_worker::{CommandWorker, Request};

const SUBMITTERS: usize = 4;
const ROUNDS: usize = 8;

fn main() {
    env_logger::init();

    let device = VulkanPoolDevice::new().expect("VulkanPoolDevice::new");
    let config = CommandPoolConfig {
        label: Some("stress"),
        queue_family_index: device.queue_family_index(),
        ..Default::default()
    };
    let worker = Arc::new(CommandWorker::spawn(device, config).expect("CommandWorker::spawn"));

    let mut handles = Vec::new();
    for submitter in 0..SUBMITTERS {
        let worker = Arc::clone(&worker);
        handles.push(std::thread::spawn(move || {
            let mut recorded = 0usize;
            for round in 0..ROUNDS {
                let count = (round % 3 + 1) as u32;
                let reply = match worker.submit(Request::Allocate {
                    level: CommandBufferLevel::Primary,
                    count,
                    record: Box::new(|_, _| Ok(())),
                }) {
                    Ok(reply) => reply,
                    Err(e) => {
                        eprintln!("submitter {}: {}", submitter, e);
                        return recorded;
                    }
                };
                let response = reply.recv().expect("response");
                if let Err(e) = &response.allocation {
                    eprintln!("submitter {}: allocation failed: {}", submitter, e);
                    continue;
                }
                recorded += response.buffers.len();
                let reply = worker
                    .submit(Request::Release(response.buffers))
                    .expect("submit release");
                reply.recv().expect("release response");
            }
            recorded
        }));
    }
    let total: usize = handles.into_iter().map(|h| h.join().expect("join")).sum();

    let done = worker.shutdown().expect("shutdown");
    done.recv().expect("completion");
    println!("Glint pool stress OK: {} buffers recorded", total);
}
