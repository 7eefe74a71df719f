//! The command worker: a dedicated thread that exclusively owns one command
//! pool and performs every native call against it.

use crate::envelope::{Request, Response};
use glint_rhi::{CommandPool, CommandPoolConfig, CommandPoolDevice};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Messages consumed by the worker thread. Requests and the shutdown signal
/// share one ordered stream; the channel is a rendezvous (capacity 0), so
/// nothing queues behind the worker's back and `Stop` takes effect as soon as
/// the in-flight request, if any, finishes.
enum Event {
    Submit(Request, mpsc::Sender<Response>),
    Stop(mpsc::Sender<()>),
}

/// Handle to a running command worker.
///
/// The worker is one dedicated OS thread that creates the pool, serves
/// requests against it strictly in submission order, and destroys it on the
/// way out. The handle owns no native resources, only the channel endpoints.
///
/// Caller contract (not checked at runtime):
/// - Never call [`submit`](Self::submit) or [`shutdown`](Self::shutdown) from
///   inside a recording callback; the callback runs on the worker thread and
///   the call would deadlock against the loop processing it.
/// - Buffers returned in a [`Response`] may only be passed back in a
///   [`Request::Release`] or recorded through a later callback on this same
///   worker; using them natively from other threads is exactly the violation
///   this type exists to prevent.
/// - There is no timeout on native calls or recording callbacks. If the
///   native API hangs, the worker hangs with it; this is a known gap.
#[derive(Debug)]
pub struct CommandWorker {
    events: mpsc::SyncSender<Event>,
    thread: Option<JoinHandle<()>>,
}

impl CommandWorker {
    /// Spawn a worker and create its pool on the new thread.
    ///
    /// Blocks until pool creation succeeds or fails. On failure the thread
    /// has already terminated without entering the serve loop, and no handle
    /// is returned.
    pub fn spawn(
        device: Arc<dyn CommandPoolDevice>,
        config: CommandPoolConfig,
    ) -> Result<CommandWorker, String> {
        let (events_tx, events_rx) = mpsc::sync_channel::<Event>(0);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let name = format!("glint-worker:{}", config.label.unwrap_or("command-pool"));
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(device, config, ready_tx, events_rx))
            .map_err(|e| e.to_string())?;
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CommandWorker {
                events: events_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err("command worker exited before reporting pool creation".to_string())
            }
        }
    }

    /// Hand one request to the worker.
    ///
    /// Blocks while the worker is busy (backpressure; nothing is queued
    /// unboundedly), then returns the reply channel for this request. The
    /// caller decides when to wait on it. Fails fast with an error once the
    /// worker is shutting down; the request is not silently dropped into a
    /// dead queue.
    pub fn submit(&self, request: Request) -> Result<mpsc::Receiver<Response>, String> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.events
            .send(Event::Submit(request, reply_tx))
            .map_err(|_| "command worker is shutting down".to_string())?;
        Ok(reply_rx)
    }

    /// Ask the worker to stop.
    ///
    /// Returns a completion channel that yields once the pool has been
    /// destroyed (exactly once, on the worker thread) and the thread is about
    /// to exit. Submissions racing with shutdown fail fast from `submit`.
    /// Calling `shutdown` a second time is not supported: it either returns
    /// an error or its completion channel reports disconnect.
    pub fn shutdown(&self) -> Result<mpsc::Receiver<()>, String> {
        let (done_tx, done_rx) = mpsc::channel();
        self.events
            .send(Event::Stop(done_tx))
            .map_err(|_| "command worker already stopped".to_string())?;
        Ok(done_rx)
    }
}

impl Drop for CommandWorker {
    /// A dropped handle still winds the worker down and joins it, so the pool
    /// is destroyed on its own thread even without an explicit `shutdown`.
    fn drop(&mut self) {
        let (done_tx, _done_rx) = mpsc::channel();
        let _ = self.events.send(Event::Stop(done_tx));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(
    device: Arc<dyn CommandPoolDevice>,
    config: CommandPoolConfig,
    ready: mpsc::Sender<Result<(), String>>,
    events: mpsc::Receiver<Event>,
) {
    let label = config.label.unwrap_or("command-pool");
    let mut pool = match device.create_command_pool(&config) {
        Ok(pool) => {
            let _ = ready.send(Ok(()));
            pool
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    log::debug!("command worker running: {}", label);

    let mut stop: Option<mpsc::Sender<()>> = None;
    while let Ok(event) = events.recv() {
        match event {
            Event::Submit(request, reply) => {
                let response = serve(pool.as_mut(), request);
                if reply.send(response).is_err() {
                    log::warn!("{}: reply receiver dropped before delivery", label);
                }
            }
            Event::Stop(done) => {
                stop = Some(done);
                break;
            }
        }
    }
    // Event stream closes before the pool goes away; late submissions fail
    // at the send instead of queuing behind a dead worker.
    drop(events);
    // The one native destroy, on the same thread that created the pool.
    drop(pool);
    if let Some(done) = stop {
        let _ = done.send(());
    }
    log::debug!("command worker stopped: {}", label);
}

/// One request at a time, entirely on the worker thread.
fn serve(pool: &mut dyn CommandPool, request: Request) -> Response {
    match request {
        Request::Release(buffers) => {
            if !buffers.is_empty() {
                pool.free(buffers);
            }
            Response::empty()
        }
        Request::Allocate {
            level,
            count,
            mut record,
        } => {
            if count == 0 {
                return Response::empty();
            }
            let buffers = match pool.allocate(level, count) {
                Ok(buffers) => buffers,
                Err(e) => return Response::failed(e),
            };
            // One failing recording does not abort the batch; every buffer
            // gets its attempt and its own outcome slot.
            let outcomes = buffers
                .iter()
                .enumerate()
                .map(|(index, buffer)| record(index, buffer.as_ref()))
                .collect();
            Response {
                allocation: Ok(()),
                buffers,
                outcomes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_rhi::{CommandBuffer, CommandBufferLevel};
    use std::any::Any;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::ThreadId;

    #[derive(Debug, Default)]
    struct MockStats {
        alloc_calls: AtomicUsize,
        free_calls: AtomicUsize,
        freed_buffers: AtomicUsize,
        pools_destroyed: AtomicUsize,
        /// Allocation failures left to inject.
        fail_allocs: AtomicUsize,
        /// Every thread that performed a native call.
        native_threads: Mutex<HashSet<ThreadId>>,
    }

    impl MockStats {
        fn touch(&self) {
            self.native_threads
                .lock()
                .unwrap()
                .insert(thread::current().id());
        }

        fn native_thread_count(&self) -> usize {
            self.native_threads.lock().unwrap().len()
        }
    }

    #[derive(Debug)]
    struct MockDevice {
        stats: Arc<MockStats>,
        fail_pool: bool,
    }

    impl MockDevice {
        fn new(fail_pool: bool) -> (Arc<Self>, Arc<MockStats>) {
            let stats = Arc::new(MockStats::default());
            (
                Arc::new(Self {
                    stats: Arc::clone(&stats),
                    fail_pool,
                }),
                stats,
            )
        }
    }

    impl CommandPoolDevice for MockDevice {
        fn create_command_pool(
            &self,
            _config: &CommandPoolConfig,
        ) -> Result<Box<dyn CommandPool>, String> {
            self.stats.touch();
            if self.fail_pool {
                return Err("mock: pool creation refused".to_string());
            }
            Ok(Box::new(MockPool {
                stats: Arc::clone(&self.stats),
                next_id: 0,
            }))
        }
    }

    #[derive(Debug)]
    struct MockPool {
        stats: Arc<MockStats>,
        next_id: u64,
    }

    impl CommandPool for MockPool {
        fn allocate(
            &mut self,
            _level: CommandBufferLevel,
            count: u32,
        ) -> Result<Vec<Box<dyn CommandBuffer>>, String> {
            self.stats.touch();
            self.stats.alloc_calls.fetch_add(1, Ordering::SeqCst);
            if self.stats.fail_allocs.load(Ordering::SeqCst) > 0 {
                self.stats.fail_allocs.fetch_sub(1, Ordering::SeqCst);
                return Err("mock: out of pool memory".to_string());
            }
            Ok((0..count)
                .map(|_| {
                    let id = self.next_id;
                    self.next_id += 1;
                    Box::new(MockBuffer { id }) as Box<dyn CommandBuffer>
                })
                .collect())
        }

        fn free(&mut self, buffers: Vec<Box<dyn CommandBuffer>>) {
            self.stats.touch();
            self.stats.free_calls.fetch_add(1, Ordering::SeqCst);
            self.stats
                .freed_buffers
                .fetch_add(buffers.len(), Ordering::SeqCst);
        }
    }

    impl Drop for MockPool {
        fn drop(&mut self) {
            self.stats.touch();
            self.stats.pools_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct MockBuffer {
        #[allow(dead_code)]
        id: u64,
    }

    impl CommandBuffer for MockBuffer {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn allocate(count: u32, record: crate::RecordFn) -> Request {
        Request::Allocate {
            level: CommandBufferLevel::Primary,
            count,
            record,
        }
    }

    #[test]
    fn handle_is_debug_formattable() {
        let (device, _stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();
        assert!(format!("{:?}", worker).contains("CommandWorker"));
    }

    #[test]
    fn construction_failure_returns_error_and_no_handle() {
        let (device, stats) = MockDevice::new(true);
        let err = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap_err();
        assert!(err.contains("pool creation refused"));
        assert_eq!(stats.pools_destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(stats.alloc_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recording_failure_marks_only_that_index() {
        // The full scenario: allocate 3 with index 1 failing, release all 3,
        // shut down, and expect exactly one pool destruction.
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        let reply = worker
            .submit(allocate(
                3,
                Box::new(|index, _buffer| {
                    if index == 1 {
                        Err("boom".to_string())
                    } else {
                        Ok(())
                    }
                }),
            ))
            .unwrap();
        let response = reply.recv().unwrap();
        assert!(response.allocation.is_ok());
        assert_eq!(response.buffers.len(), 3);
        assert_eq!(
            response.outcomes,
            vec![Ok(()), Err("boom".to_string()), Ok(())]
        );

        let reply = worker.submit(Request::Release(response.buffers)).unwrap();
        let response = reply.recv().unwrap();
        assert!(response.allocation.is_ok());
        assert!(response.buffers.is_empty());
        assert!(response.outcomes.is_empty());
        assert_eq!(stats.free_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.freed_buffers.load(Ordering::SeqCst), 3);

        let done = worker.shutdown().unwrap();
        done.recv().unwrap();
        assert_eq!(stats.pools_destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_count_allocation_issues_no_native_call() {
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        let reply = worker
            .submit(allocate(0, Box::new(|_, _| Err("must not run".to_string()))))
            .unwrap();
        let response = reply.recv().unwrap();
        assert!(response.allocation.is_ok());
        assert!(response.buffers.is_empty());
        assert!(response.outcomes.is_empty());

        let reply = worker.submit(Request::Release(Vec::new())).unwrap();
        reply.recv().unwrap();

        assert_eq!(stats.alloc_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.free_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_allocation_yields_no_buffers_and_loop_survives() {
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        stats.fail_allocs.store(1, Ordering::SeqCst);
        let reply = worker.submit(allocate(3, Box::new(|_, _| Ok(())))).unwrap();
        let response = reply.recv().unwrap();
        assert_eq!(
            response.allocation,
            Err("mock: out of pool memory".to_string())
        );
        assert!(response.buffers.is_empty());
        assert!(response.outcomes.is_empty());

        // The failure was reported, not fatal: the next request succeeds.
        let reply = worker.submit(allocate(2, Box::new(|_, _| Ok(())))).unwrap();
        let response = reply.recv().unwrap();
        assert!(response.allocation.is_ok());
        assert_eq!(response.buffers.len(), 2);
        assert_eq!(response.outcomes.len(), 2);
    }

    #[test]
    fn requests_are_served_in_submission_order() {
        let (device, _stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let mut replies = Vec::new();
        for k in 0..3 {
            let order = Arc::clone(&order);
            let reply = worker
                .submit(allocate(
                    1,
                    Box::new(move |_, _| {
                        order.lock().unwrap().push(k);
                        Ok(())
                    }),
                ))
                .unwrap();
            replies.push(reply);
        }
        for reply in replies {
            assert!(reply.recv().unwrap().allocation.is_ok());
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn native_calls_stay_on_one_thread() {
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(
            device,
            CommandPoolConfig {
                label: Some("exclusivity"),
                ..Default::default()
            },
        )
        .unwrap();

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..3 {
                        let reply = worker
                            .submit(allocate(2, Box::new(|_, _| Ok(()))))
                            .unwrap();
                        let response = reply.recv().unwrap();
                        let reply = worker
                            .submit(Request::Release(response.buffers))
                            .unwrap();
                        reply.recv().unwrap();
                    }
                });
            }
        });

        let done = worker.shutdown().unwrap();
        done.recv().unwrap();

        // Pool creation, every allocate/free, and the destroy all ran on a
        // single thread, and not on this one.
        assert_eq!(stats.native_thread_count(), 1);
        assert!(!stats
            .native_threads
            .lock()
            .unwrap()
            .contains(&thread::current().id()));
    }

    #[test]
    fn shutdown_destroys_pool_exactly_once() {
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        let done = worker.shutdown().unwrap();
        done.recv().unwrap();
        assert_eq!(stats.pools_destroyed.load(Ordering::SeqCst), 1);

        // A second shutdown is rejected or its completion channel reports
        // disconnect; either way nothing is destroyed twice.
        match worker.shutdown() {
            Err(_) => {}
            Ok(done) => assert!(done.recv().is_err()),
        }
        assert_eq!(stats.pools_destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_shutdown_fails_fast() {
        let (device, _stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();

        let done = worker.shutdown().unwrap();
        done.recv().unwrap();

        let err = worker
            .submit(allocate(1, Box::new(|_, _| Ok(()))))
            .unwrap_err();
        assert!(err.contains("shutting down"));
    }

    #[test]
    fn dropping_the_handle_still_destroys_the_pool() {
        let (device, stats) = MockDevice::new(false);
        let worker = CommandWorker::spawn(device, CommandPoolConfig::default()).unwrap();
        drop(worker);
        assert_eq!(stats.pools_destroyed.load(Ordering::SeqCst), 1);
    }
}
