//! Glint RHI: the backend-facing seam for thread-confined command recording.
//! This crate defines the traits and types a command worker needs to drive a
//! native command pool: create it, allocate and free command buffers from it,
//! and destroy it. The pool and everything allocated from it belong to exactly
//! one thread for their whole life, so the traits are cut to make that easy to
//! honor and hard to subvert.

use std::any::Any;
use std::fmt::Debug;

pub mod support;

bitflags::bitflags! {
    /// Command pool creation flags; combine as needed (e.g. TRANSIENT | RESET_COMMAND_BUFFER).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandPoolFlags: u32 {
        /// Buffers from this pool are short-lived.
        const TRANSIENT = 1 << 0;
        /// Buffers can be reset individually instead of via the pool.
        const RESET_COMMAND_BUFFER = 1 << 1;
    }
}

/// Command buffer level. Secondary buffers are executed from primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

/// Configuration for creating a command pool.
#[derive(Debug, Clone)]
pub struct CommandPoolConfig {
    pub label: Option<&'static str>,
    /// Queue family the pool's buffers will be submitted to.
    pub queue_family_index: u32,
    pub flags: CommandPoolFlags,
}

impl Default for CommandPoolConfig {
    fn default() -> Self {
        Self {
            label: None,
            queue_family_index: 0,
            flags: CommandPoolFlags::RESET_COMMAND_BUFFER,
        }
    }
}

/// Opaque handle to a command buffer allocated from a [`CommandPool`].
///
/// The handle itself may travel between threads as a value, but native calls
/// against it are only valid on the thread that owns its pool. Implementations
/// must NOT free the underlying buffer on `Drop`: dropping happens on whatever
/// thread holds the box last, and freeing is a pool operation. Buffers are
/// returned to the pool explicitly, in a batch, by the owning thread.
pub trait CommandBuffer: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// A native command pool and the buffers allocated from it.
///
/// Deliberately not `Send`: a pool is created on one thread and must be used
/// and destroyed there. The native pool is destroyed in `Drop`, which also
/// reclaims any buffers still allocated from it.
pub trait CommandPool: Debug {
    /// Allocate `count` buffers with one native call.
    fn allocate(
        &mut self,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<Box<dyn CommandBuffer>>, String>;

    /// Free a batch of buffers with one native call. Buffers that do not
    /// belong to this backend are skipped with a warning.
    fn free(&mut self, buffers: Vec<Box<dyn CommandBuffer>>);
}

/// Capability reference to the device a pool is created against.
///
/// Shared freely across threads; the pool it creates is not. The worker calls
/// this exactly once, from the thread that will own the pool.
pub trait CommandPoolDevice: Send + Sync + Debug {
    fn create_command_pool(
        &self,
        config: &CommandPoolConfig,
    ) -> Result<Box<dyn CommandPool>, String>;
}

#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(feature = "vulkan")]
pub use vulkan::VulkanPoolDevice;
