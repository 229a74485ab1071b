//! Background I/O thread driving the [`ConnectionSupervisor`].
//!
//! The thread runs a single-threaded tokio runtime. Each iteration ticks the
//! supervisor, then waits for either the wake signal raised by enqueued
//! outbound work or the configured maximum wait. The [`Notify`] permit
//! semantics mean a wake raised while the supervisor is ticking is not lost.
//!
//! [`Notify`]: tokio::sync::Notify

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::error::Result;
use crate::shared::Shared;
use crate::supervisor::ConnectionSupervisor;

/// Name given to the background thread.
pub(crate) const IO_THREAD_NAME: &str = "rich-presence-io";

/// Handle to the running I/O thread.
#[derive(Debug)]
pub(crate) struct IoLoop {
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    thread: JoinHandle<ConnectionSupervisor>,
}

impl IoLoop {
    /// Start the I/O thread.
    ///
    /// The runtime is built before the thread is spawned so that failures
    /// surface here instead of inside the thread.
    pub(crate) fn spawn(
        mut supervisor: ConnectionSupervisor,
        shared: Arc<Shared>,
        max_wait: Duration,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let running = Arc::new(AtomicBool::new(true));

        let loop_running = Arc::clone(&running);
        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(IO_THREAD_NAME.to_owned())
            .spawn(move || {
                debug!("I/O loop started");
                runtime.block_on(async {
                    while loop_running.load(Ordering::Acquire) {
                        supervisor.tick(Instant::now());
                        if tokio::time::timeout(max_wait, loop_shared.wake.notified())
                            .await
                            .is_ok()
                        {
                            trace!("I/O loop woken early");
                        }
                    }
                });
                debug!("I/O loop exited");
                supervisor
            })?;

        Ok(Self {
            running,
            shared,
            thread,
        })
    }

    /// Ask the loop to run a tick now instead of waiting out `max_wait`.
    pub(crate) fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Stop the loop and join the thread, returning the supervisor so the
    /// caller can close the transport.
    ///
    /// Returns `None` if the thread panicked.
    pub(crate) fn stop(self) -> Option<ConnectionSupervisor> {
        self.running.store(false, Ordering::Release);
        self.shared.wake.notify_one();
        match self.thread.join() {
            Ok(supervisor) => Some(supervisor),
            Err(_) => {
                error!("I/O thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::error::TransportError;
    use crate::supervisor::ConnectionState;
    use crate::transport::{OpenStatus, Transport};
    use std::sync::Mutex as StdMutex;

    /// Connects on the first attempt and records every write.
    struct RecordingTransport {
        open: bool,
        written: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    impl Transport for RecordingTransport {
        fn open(&mut self) -> std::result::Result<OpenStatus, TransportError> {
            self.open = true;
            Ok(OpenStatus::Connected)
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read(&mut self) -> std::result::Result<Option<&[u8]>, TransportError> {
            Ok(None)
        }

        fn write(&mut self, payload: &[u8]) -> std::result::Result<(), TransportError> {
            self.written.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn spawn(max_wait: Duration) -> (IoLoop, Arc<Shared>, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let shared = Arc::new(Shared::new(8, 1024, 1));
        let written = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            open: false,
            written: Arc::clone(&written),
        };
        let supervisor = ConnectionSupervisor::new(
            Box::new(transport),
            Arc::clone(&shared),
            Backoff::default(),
            Instant::now(),
        );
        let io = IoLoop::spawn(supervisor, Arc::clone(&shared), max_wait).unwrap();
        (io, shared, written)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn enqueued_work_wakes_the_loop() {
        // A long max_wait means only the wake signal can flush in time.
        let (io, shared, written) = spawn(Duration::from_secs(60));
        assert!(wait_until(|| shared.is_connected()));

        assert!(shared.set_activity(None));
        assert!(wait_until(|| written.lock().unwrap().len() == 1));

        io.stop().unwrap();
    }

    #[test]
    fn stop_interrupts_the_wait_and_returns_the_supervisor() {
        let (io, shared, _written) = spawn(Duration::from_secs(60));
        assert!(wait_until(|| shared.is_connected()));

        let started = Instant::now();
        let supervisor = io.stop().expect("supervisor");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[test]
    fn loop_ticks_on_max_wait_without_wakes() {
        let (io, shared, written) = spawn(Duration::from_millis(10));
        assert!(wait_until(|| shared.is_connected()));

        // Commit without notifying: only the periodic tick can flush this.
        let mut slot = shared.queue.try_reserve().unwrap();
        let len = crate::protocol::encode_into(
            slot.buffer_mut(),
            &crate::protocol::Command::Subscribe {
                nonce: crate::protocol::Nonce(1),
                evt: crate::protocol::Subscription::JoinGame,
            },
        )
        .unwrap();
        slot.commit(len);

        assert!(wait_until(|| written.lock().unwrap().len() == 1));
        io.stop().unwrap();
    }
}
