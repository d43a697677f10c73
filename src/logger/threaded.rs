// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::mem;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::Error;
use crate::ErrorKind;
use crate::Line;
use crate::clock::Clock;
use crate::logger::ThreadedLoggerBuilder;
use crate::queue::PendingQueue;
use crate::scheduler::Registration;
use crate::scheduler::Scheduler;
use crate::scheduler::Task;
use crate::sink::FileSink;
use crate::sink::Sink;
use crate::sink::SinkConfig;
use crate::trap::Trap;

/// The default period between two timer-driven flushes.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// A logger that buffers lines in memory and writes them to its [`Sink`] from a periodic flush.
///
/// [`append`](ThreadedLogger::append) only ever takes the queue lock for a push, so it never
/// waits on disk I/O. Every flush swaps the pending queue for an empty one and writes the
/// detached lines under a separate sink lock.
///
/// Buffered lines are only guaranteed to reach the sink through [`close`](ThreadedLogger::close)
/// (also run on drop); lines still pending when the process exits without either are lost.
#[derive(Debug)]
pub struct ThreadedLogger {
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
    registration: Mutex<Option<Registration>>,
    delay: Duration,
}

#[derive(Debug)]
struct Shared {
    pending: Mutex<Pending>,
    sink: Mutex<SinkState>,
    timestamp: AtomicBool,
    capacity: AtomicUsize,
    clock: Clock,
    trap: Arc<dyn Trap>,
}

#[derive(Debug)]
enum Pending {
    Open(PendingQueue),
    Closed,
}

#[derive(Debug)]
struct SinkState {
    sink: Box<dyn Sink>,
    closed: bool,
}

struct FlushEvent {
    shared: Weak<Shared>,
}

impl Task for FlushEvent {
    fn fire(&self) {
        if let Some(shared) = self.shared.upgrade() {
            // errors are trapped inside
            let _ = shared.flush();
        }
    }
}

impl ThreadedLogger {
    /// Open a [`FileSink`] on `config` and build a logger on it with default settings.
    pub fn open(config: SinkConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self, Error> {
        let sink = FileSink::open(config)?;
        ThreadedLoggerBuilder::new(sink).build(scheduler)
    }

    /// Creates a new [`ThreadedLoggerBuilder`].
    pub fn builder(sink: impl Into<Box<dyn Sink>>) -> ThreadedLoggerBuilder {
        ThreadedLoggerBuilder::new(sink)
    }

    pub(crate) fn from_builder(
        builder: ThreadedLoggerBuilder,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, Error> {
        let ThreadedLoggerBuilder {
            sink,
            delay,
            capacity,
            trap,
            clock,
        } = builder;

        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::Open(PendingQueue::with_capacity(capacity))),
            timestamp: AtomicBool::new(sink.config().timestamp()),
            sink: Mutex::new(SinkState {
                sink,
                closed: false,
            }),
            capacity: AtomicUsize::new(capacity),
            clock,
            trap,
        });

        let event = FlushEvent {
            shared: Arc::downgrade(&shared),
        };
        let registration = scheduler.register(delay, Arc::new(event))?;

        Ok(Self {
            shared,
            scheduler,
            registration: Mutex::new(Some(registration)),
            delay,
        })
    }

    /// Queue a line for the next flush.
    ///
    /// The line is stamped with the current time if timestamps are enabled.
    ///
    /// # Errors
    ///
    /// Return an [`ErrorKind::Closed`] error if the logger has been closed.
    pub fn append(&self, text: impl Into<String>) -> Result<(), Error> {
        let line = if self.shared.timestamp.load(Ordering::Relaxed) {
            Line::stamped(text, self.shared.clock.now())
        } else {
            Line::new(text)
        };
        self.shared.push(line, "append")
    }

    /// Queue a single raw character as its own line. Raw characters are never stamped.
    pub fn append_char(&self, c: char) -> Result<(), Error> {
        self.shared.push(Line::new(c), "append_char")
    }

    /// Reserve room for at least `additional` more lines in the pending queue.
    ///
    /// The hint is kept, so queues installed by later flushes start with that capacity too.
    pub fn reserve(&self, additional: usize) -> Result<(), Error> {
        let mut pending = self.shared.pending();
        match &mut *pending {
            Pending::Open(queue) => {
                queue.reserve(additional);
                self.shared.capacity.store(additional, Ordering::Relaxed);
                Ok(())
            }
            Pending::Closed => Err(Error::closed("reserve")),
        }
    }

    /// Write every pending line to the sink now.
    ///
    /// Failures are reported to the trap as well as returned. A failed batch is not re-queued.
    /// Flushing a closed logger does nothing.
    pub fn flush(&self) -> Result<(), Error> {
        self.shared.flush()
    }

    /// Stop the periodic flush and write out everything still pending.
    ///
    /// Closing twice is a no-op. After this returns no more writes reach the sink, and
    /// [`append`](ThreadedLogger::append) fails with [`ErrorKind::Closed`].
    ///
    /// # Errors
    ///
    /// Return the error of the final flush, if any. The logger is closed regardless.
    pub fn close(&self) -> Result<(), Error> {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(registration) = registration {
            self.scheduler.unregister(registration);
        }
        self.shared.close()
    }

    /// Whether [`close`](ThreadedLogger::close) has been called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.shared.pending(), Pending::Closed)
    }

    /// Build a logger with the same destination, its own sink handle, its own empty queue and its
    /// own periodic flush.
    pub fn try_clone(&self) -> Result<ThreadedLogger, Error> {
        let sink = {
            let state = self.shared.sink();
            if state.closed {
                return Err(Error::closed("try_clone"));
            }
            state.sink.fork()?
        };

        let builder = ThreadedLoggerBuilder {
            sink,
            delay: self.delay,
            capacity: self.shared.capacity.load(Ordering::Relaxed),
            trap: self.shared.trap.clone(),
            clock: self.shared.clock.clone(),
        };
        builder.build(self.scheduler.clone())
    }

    /// Write to the file at `path` from the next flush on.
    pub fn set_out_file(&self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        self.shared
            .reconfigure("set_out_file", |config| config.set_path(path))
    }

    /// Write to the file `file_name` inside `dir` from the next flush on.
    pub fn set_out_file_in(
        &self,
        dir: impl AsRef<Path>,
        file_name: impl AsRef<Path>,
    ) -> Result<(), Error> {
        self.set_out_file(dir.as_ref().join(file_name))
    }

    /// Set the directory rotated files are moved into.
    pub fn set_move_directory(&self, dir: impl Into<PathBuf>) -> Result<(), Error> {
        let dir = dir.into();
        self.shared
            .reconfigure("set_move_directory", |config| config.set_move_directory(dir))
    }

    /// Set the size in KiB past which the file is rotated. `0` disables rotation.
    pub fn set_move_size(&self, kb: u64) -> Result<(), Error> {
        self.shared
            .reconfigure("set_move_size", |config| config.set_move_size(kb))
    }

    /// Enable or disable timestamp prefixes.
    ///
    /// Lines appended while enabled carry the time they were appended at.
    pub fn enable_timestamp(&self, enabled: bool) -> Result<(), Error> {
        self.shared
            .reconfigure("enable_timestamp", |config| config.set_timestamp(enabled))
    }

    /// A snapshot of the sink configuration.
    pub fn config(&self) -> SinkConfig {
        self.shared.sink().sink.config().clone()
    }

    /// The period between two timer-driven flushes.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[cfg(feature = "bridge-log")]
    pub(crate) fn trap(&self) -> &dyn Trap {
        self.shared.trap.as_ref()
    }
}

impl Drop for ThreadedLogger {
    fn drop(&mut self) {
        // flush errors have been trapped already
        let _ = self.close();
    }
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sink(&self) -> MutexGuard<'_, SinkState> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, line: Line, operation: &'static str) -> Result<(), Error> {
        let mut pending = self.pending();
        match &mut *pending {
            Pending::Open(queue) => {
                queue.push(line);
                Ok(())
            }
            Pending::Closed => Err(Error::closed(operation)),
        }
    }

    fn flush(&self) -> Result<(), Error> {
        let mut state = self.sink();
        self.drain(&mut state, false)
    }

    fn close(&self) -> Result<(), Error> {
        let mut state = self.sink();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.drain(&mut state, true)
    }

    // The sink lock is taken before the queue lock, on every path that takes both. Holding it
    // across the swap keeps batches from two racing flushes in swap order.
    fn drain(&self, state: &mut SinkState, closing: bool) -> Result<(), Error> {
        let fresh = if closing {
            Pending::Closed
        } else {
            Pending::Open(PendingQueue::with_capacity(
                self.capacity.load(Ordering::Relaxed),
            ))
        };

        let batch = {
            let mut pending = self.pending();
            match &*pending {
                Pending::Closed => return Ok(()),
                Pending::Open(queue) if queue.is_empty() && !closing => return Ok(()),
                Pending::Open(_) => {}
            }
            match mem::replace(&mut *pending, fresh) {
                Pending::Open(queue) => queue,
                Pending::Closed => return Ok(()),
            }
        };

        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(state.sink.as_mut(), batch)
    }

    fn write_batch(&self, sink: &mut dyn Sink, batch: PendingQueue) -> Result<(), Error> {
        let total = batch.len();
        for (written, line) in batch.into_lines().enumerate() {
            if let Err(err) = sink.write(&line) {
                let err = Error::new(ErrorKind::SinkWrite, "failed to write batch to sink")
                    .with_context("written", written)
                    .with_context("dropped", total - written)
                    .with_source(err);
                self.trap.trap(&err);
                return Err(err);
            }
        }

        if let Err(err) = sink.flush() {
            let err = Error::new(ErrorKind::SinkWrite, "failed to flush sink").with_source(err);
            self.trap.trap(&err);
            return Err(err);
        }
        Ok(())
    }

    fn reconfigure(
        &self,
        operation: &'static str,
        update: impl FnOnce(&mut SinkConfig),
    ) -> Result<(), Error> {
        let mut state = self.sink();
        if state.closed {
            return Err(Error::closed(operation));
        }

        let mut config = state.sink.config().clone();
        update(&mut config);
        state.sink.configure(&config)?;
        self.timestamp
            .store(state.sink.config().timestamp(), Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use jiff::Timestamp;

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    struct RecordingSink {
        config: SinkConfig,
        lines: Arc<Mutex<Vec<Line>>>,
        flushes: Arc<AtomicUsize>,
    }

    impl Sink for RecordingSink {
        fn write(&mut self, line: &Line) -> Result<(), Error> {
            self.lines.lock().unwrap().push(line.clone());
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Error> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn config(&self) -> &SinkConfig {
            &self.config
        }

        fn configure(&mut self, config: &SinkConfig) -> Result<(), Error> {
            self.config = config.clone();
            Ok(())
        }

        fn fork(&self) -> Result<Box<dyn Sink>, Error> {
            Err(Error::new(ErrorKind::Unexpected, "not supported"))
        }
    }

    // A scheduler that never fires, so tests drive every flush by hand.
    #[derive(Debug, Default)]
    struct ManualScheduler {
        registered: AtomicUsize,
        unregistered: AtomicUsize,
    }

    impl Scheduler for ManualScheduler {
        fn register(&self, _: Duration, _: Arc<dyn Task>) -> Result<Registration, Error> {
            let id = self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(Registration::new(id as u64))
        }

        fn unregister(&self, _: Registration) {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn now() -> Timestamp {
        Timestamp::from_str("2024-03-01T08:30:00Z").unwrap()
    }

    fn logger(
        config: SinkConfig,
    ) -> (
        ThreadedLogger,
        Arc<Mutex<Vec<Line>>>,
        Arc<AtomicUsize>,
        Arc<ManualScheduler>,
    ) {
        let lines = Arc::new(Mutex::new(vec![]));
        let flushes = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink {
            config,
            lines: lines.clone(),
            flushes: flushes.clone(),
        };
        let scheduler = Arc::new(ManualScheduler::default());
        let logger = ThreadedLoggerBuilder::new(sink)
            .clock(Clock::ManualClock(ManualClock::new(now())))
            .build(scheduler.clone())
            .unwrap();
        (logger, lines, flushes, scheduler)
    }

    #[test]
    fn test_flush_swaps_queue_and_writes_in_order() {
        let (logger, lines, flushes, _) = logger(SinkConfig::new("unused.log"));

        logger.append("a").unwrap();
        logger.append("b").unwrap();
        assert!(lines.lock().unwrap().is_empty());

        logger.flush().unwrap();
        assert_eq!(*lines.lock().unwrap(), vec![Line::new("a"), Line::new("b")]);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        // an empty queue does not reach the sink
        logger.flush().unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lines_are_stamped_at_append_time() {
        let (logger, lines, _, _) = logger(SinkConfig::new("unused.log").with_timestamp(true));

        logger.append("stamped").unwrap();
        logger.append_char('x').unwrap();
        logger.enable_timestamp(false).unwrap();
        logger.append("plain").unwrap();
        logger.flush().unwrap();

        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                Line::stamped("stamped", now()),
                Line::new("x"),
                Line::new("plain"),
            ]
        );
        assert!(!logger.config().timestamp());
    }

    #[test]
    fn test_close_unregisters_and_is_idempotent() {
        let (logger, lines, flushes, scheduler) = logger(SinkConfig::new("unused.log"));
        assert_eq!(scheduler.registered.load(Ordering::SeqCst), 1);

        logger.append("last words").unwrap();
        logger.close().unwrap();
        logger.close().unwrap();

        assert!(logger.is_closed());
        assert_eq!(scheduler.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(*lines.lock().unwrap(), vec![Line::new("last words")]);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        assert_eq!(logger.append("late").unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(logger.append_char('x').unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(logger.reserve(8).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(
            logger.set_move_size(4).unwrap_err().kind(),
            ErrorKind::Closed
        );
        assert_eq!(logger.try_clone().unwrap_err().kind(), ErrorKind::Closed);

        logger.flush().unwrap();
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_closes_logger() {
        let (logger, lines, _, scheduler) = logger(SinkConfig::new("unused.log"));
        logger.append("dropped").unwrap();
        drop(logger);

        assert_eq!(scheduler.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(*lines.lock().unwrap(), vec![Line::new("dropped")]);
    }

    #[test]
    fn test_reconfiguration_updates_sink_config() {
        let (logger, _, _, _) = logger(SinkConfig::new("first.log"));

        logger.set_out_file_in("logs", "second.log").unwrap();
        logger.set_move_directory("logs/old").unwrap();
        logger.set_move_size(512).unwrap();

        let config = logger.config();
        assert_eq!(config.path(), Path::new("logs").join("second.log").as_path());
        assert_eq!(config.move_directory(), Some(Path::new("logs/old")));
        assert_eq!(config.move_size_kb(), 512);
    }

    #[test]
    fn test_reserve_keeps_capacity_hint() {
        let (logger, _, _, _) = logger(SinkConfig::new("unused.log"));
        logger.reserve(64).unwrap();
        assert_eq!(logger.shared.capacity.load(Ordering::Relaxed), 64);

        let capacity = |logger: &ThreadedLogger| match &*logger.shared.pending() {
            Pending::Open(queue) => queue.capacity(),
            Pending::Closed => 0,
        };
        assert!(capacity(&logger) >= 64);

        // the queue swapped in by a flush starts with the hinted capacity
        logger.append("a").unwrap();
        logger.flush().unwrap();
        assert!(capacity(&logger) >= 64);

        logger.append("b").unwrap();
        logger.flush().unwrap();
        assert!(capacity(&logger) >= 64);
    }
}
