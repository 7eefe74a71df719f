//! Request/Response envelope exchanged between callers and a command worker.

use glint_rhi::{CommandBuffer, CommandBufferLevel};

/// Caller-supplied recording logic, run on the worker thread once per freshly
/// allocated buffer, in index order.
///
/// The callback must not touch resources confined to a different worker, and
/// must not call back into the handle that delivered it (see
/// [`CommandWorker`](crate::CommandWorker)).
pub type RecordFn = Box<dyn FnMut(usize, &dyn CommandBuffer) -> Result<(), String> + Send>;

/// One unit of work for a command worker. A tagged sum rather than a struct
/// of optionals, so a request is always exactly one of the two operations.
pub enum Request {
    /// Return previously allocated buffers to the pool, as one native free
    /// call. An empty batch issues no native call.
    Release(Vec<Box<dyn CommandBuffer>>),
    /// Allocate `count` buffers with one native call, then record each via
    /// `record`. A count of zero issues no native call and yields the empty
    /// success response.
    Allocate {
        level: CommandBufferLevel,
        count: u32,
        record: RecordFn,
    },
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Release(buffers) => {
                f.debug_tuple("Release").field(&buffers.len()).finish()
            }
            Request::Allocate { level, count, .. } => f
                .debug_struct("Allocate")
                .field("level", level)
                .field("count", count)
                .finish_non_exhaustive(),
        }
    }
}

/// The outcome of one [`Request`], produced exactly once per request.
///
/// When `allocation` is `Ok`, `buffers` and `outcomes` have the same length
/// and align by index. When it is `Err`, both are empty: no partially
/// allocated handles ever reach the caller.
#[derive(Debug)]
pub struct Response {
    pub allocation: Result<(), String>,
    pub buffers: Vec<Box<dyn CommandBuffer>>,
    pub outcomes: Vec<Result<(), String>>,
}

impl Response {
    /// Success with nothing allocated (releases and zero-count allocations).
    pub fn empty() -> Self {
        Self {
            allocation: Ok(()),
            buffers: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// A failed native allocation.
    pub fn failed(err: String) -> Self {
        Self {
            allocation: Err(err),
            buffers: Vec::new(),
            outcomes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_is_success_with_no_handles() {
        let response = Response::empty();
        assert!(response.allocation.is_ok());
        assert!(response.buffers.is_empty());
        assert!(response.outcomes.is_empty());
    }

    #[test]
    fn failed_response_carries_the_error_and_no_handles() {
        let response = Response::failed("out of device memory".to_string());
        assert_eq!(response.allocation, Err("out of device memory".to_string()));
        assert!(response.buffers.is_empty());
        assert!(response.outcomes.is_empty());
    }

    #[test]
    fn request_debug_does_not_require_the_recorder() {
        let request = Request::Allocate {
            level: CommandBufferLevel::Primary,
            count: 2,
            record: Box::new(|_, _| Ok(())),
        };
        let text = format!("{:?}", request);
        assert!(text.contains("Allocate"));
        assert!(text.contains('2'));
    }
}
