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

//! Destinations that persist flushed lines.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

pub use self::file::FileSink;
pub use self::file::FileSinkBuilder;
use crate::Error;
use crate::Line;

mod file;

/// A durable destination for log lines.
///
/// Implementations need not be thread-safe: a [`ThreadedLogger`](crate::ThreadedLogger) owns its
/// sink exclusively and never calls into it from two threads at once.
pub trait Sink: fmt::Debug + Send + 'static {
    /// Persist one line, prefixed with its timestamp if it carries one.
    fn write(&mut self, line: &Line) -> Result<(), Error>;

    /// Flush any bytes buffered by the sink itself.
    ///
    /// Called once at the end of every non-empty batch.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// The configuration currently in effect.
    fn config(&self) -> &SinkConfig;

    /// Apply a new configuration.
    ///
    /// On error the previous configuration must stay in effect.
    fn configure(&mut self, config: &SinkConfig) -> Result<(), Error>;

    /// Open an independent sink on the current configuration.
    fn fork(&self) -> Result<Box<dyn Sink>, Error>;
}

impl<T: Sink> From<T> for Box<dyn Sink> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// Destination configuration of a [`Sink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    path: PathBuf,
    move_directory: Option<PathBuf>,
    move_size_kb: u64,
    timestamp: bool,
}

impl SinkConfig {
    /// Create a configuration writing to `path`, never rotating, without timestamps.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            move_directory: None,
            move_size_kb: 0,
            timestamp: false,
        }
    }

    /// Set the directory rotated files are moved into.
    #[must_use]
    pub fn with_move_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.move_directory = Some(dir.into());
        self
    }

    /// Set the size in KiB after which the file is rotated. `0` disables rotation.
    #[must_use]
    pub fn with_move_size_kb(mut self, kb: u64) -> Self {
        self.move_size_kb = kb;
        self
    }

    /// Prefix each line with the local time it was appended at.
    #[must_use]
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    /// The file lines are written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory rotated files are moved into, if any.
    pub fn move_directory(&self) -> Option<&Path> {
        self.move_directory.as_deref()
    }

    /// The rotation threshold in KiB; `0` means never.
    pub fn move_size_kb(&self) -> u64 {
        self.move_size_kb
    }

    /// Whether newly appended lines are stamped with the time they were appended at.
    pub fn timestamp(&self) -> bool {
        self.timestamp
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub(crate) fn set_move_directory(&mut self, dir: PathBuf) {
        self.move_directory = Some(dir);
    }

    pub(crate) fn set_move_size(&mut self, kb: u64) {
        self.move_size_kb = kb;
    }

    pub(crate) fn set_timestamp(&mut self, enabled: bool) {
        self.timestamp = enabled;
    }
}
