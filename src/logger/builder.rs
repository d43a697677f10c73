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

use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::clock::Clock;
use crate::logger::ThreadedLogger;
use crate::logger::threaded::DEFAULT_DELAY;
use crate::scheduler::Scheduler;
use crate::sink::Sink;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

/// A builder for configuring a [`ThreadedLogger`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use threadlog::ThreadScheduler;
/// use threadlog::ThreadedLoggerBuilder;
/// use threadlog::sink::FileSink;
/// use threadlog::sink::SinkConfig;
///
/// let scheduler = Arc::new(ThreadScheduler::new("log-flusher").unwrap());
/// let sink = FileSink::open(SinkConfig::new("logs/server.log")).unwrap();
/// let logger = ThreadedLoggerBuilder::new(sink)
///     .delay(Duration::from_millis(250))
///     .build(scheduler)
///     .unwrap();
///
/// logger.append("server started").unwrap();
/// logger.close().unwrap();
/// ```
#[derive(Debug)]
pub struct ThreadedLoggerBuilder {
    pub(crate) sink: Box<dyn Sink>,
    pub(crate) delay: Duration,
    pub(crate) capacity: usize,
    pub(crate) trap: Arc<dyn Trap>,
    pub(crate) clock: Clock,
}

impl ThreadedLoggerBuilder {
    /// Create a new builder writing through `sink`.
    pub fn new(sink: impl Into<Box<dyn Sink>>) -> Self {
        Self {
            sink: sink.into(),
            delay: DEFAULT_DELAY,
            capacity: 0,
            trap: Arc::new(DefaultTrap::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Set the period between two timer-driven flushes.
    ///
    /// Default to [`DEFAULT_DELAY`].
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set how many lines every fresh pending queue is allocated for.
    #[must_use]
    pub fn reserve(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the trap receiving flush errors.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = Arc::from(trap.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the logger and register its periodic flush with `scheduler`.
    ///
    /// # Errors
    ///
    /// Return an error if the scheduler refuses the registration.
    pub fn build(self, scheduler: Arc<dyn Scheduler>) -> Result<ThreadedLogger, Error> {
        ThreadedLogger::from_builder(self, scheduler)
    }
}
