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

//! Threadlog is a thread-safe logging buffer that keeps disk I/O off latency-sensitive threads.
//!
//! # Overview
//!
//! A [`ThreadedLogger`] accepts lines from any number of threads and keeps them in memory. A
//! [`Scheduler`] fires a flush every [`DEFAULT_DELAY`] (or whatever delay the logger was built
//! with), which detaches the buffered lines in one O(1) swap and writes them to the logger's
//! [`Sink`](sink::Sink) under a separate lock. Appending never waits on the sink.
//!
//! [`ThreadedLogger::close`] (also run on drop) stops the periodic flush and writes out whatever
//! is still pending; afterwards appends fail with [`ErrorKind::Closed`].
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use threadlog::ThreadScheduler;
//! use threadlog::ThreadedLogger;
//! use threadlog::sink::SinkConfig;
//!
//! let scheduler = Arc::new(ThreadScheduler::new("log-flusher").unwrap());
//! let config = SinkConfig::new("logs/game.log")
//!     .with_move_directory("logs/old")
//!     .with_move_size_kb(2048)
//!     .with_timestamp(true);
//!
//! let logger = ThreadedLogger::open(config, scheduler).unwrap();
//! logger.append("A new game has started").unwrap();
//! logger.close().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod scheduler;
pub mod sink;
pub mod trap;

mod clock;
mod error;
mod logger;
mod queue;

pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::logger::DEFAULT_DELAY;
pub use self::logger::ThreadedLogger;
pub use self::logger::ThreadedLoggerBuilder;
pub use self::queue::Line;
pub use self::scheduler::Scheduler;
pub use self::scheduler::ThreadScheduler;
pub use self::trap::DefaultTrap;
pub use self::trap::Trap;
