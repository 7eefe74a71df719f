//! Glint worker: multi-threaded access to thread-confined command pools.
//!
//! A command pool and every buffer allocated from it must only ever be touched
//! by one thread. Locks cannot provide that (they serialize access, they do
//! not pin it to a thread), so this crate dedicates one OS thread per pool:
//! the [`CommandWorker`] owns the pool for its whole life and performs every
//! native call against it, while any number of application threads hand it
//! work through [`Request`] envelopes and read the [`Response`] back through
//! per-request reply channels.

pub mod envelope;
pub mod worker;

pub use envelope::{RecordFn, Request, Response};
pub use worker::CommandWorker;
