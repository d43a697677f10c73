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

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use jiff::Timestamp;
use jiff::tz::TimeZone;

use crate::Error;
use crate::ErrorKind;
use crate::Line;
use crate::clock::Clock;
use crate::sink::Sink;
use crate::sink::SinkConfig;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ROTATED_NAME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A builder for configuring [`FileSink`].
#[derive(Debug)]
pub struct FileSinkBuilder {
    config: SinkConfig,
    clock: Clock,
    trap: Arc<dyn Trap>,
}

impl FileSinkBuilder {
    /// Creates a new [`FileSinkBuilder`].
    #[must_use]
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            clock: Clock::DefaultClock,
            trap: Arc::new(DefaultTrap::default()),
        }
    }

    /// Set the trap for rotation errors.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = Arc::from(trap.into());
        self
    }

    #[cfg(test)]
    fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the [`FileSink`].
    ///
    /// # Errors
    ///
    /// Return an error if the log directory or the log file cannot be created.
    pub fn build(self) -> Result<FileSink, Error> {
        let Self {
            config,
            clock,
            trap,
        } = self;

        if let Some(dir) = config.move_directory() {
            create_dir(dir)?;
        }
        let (writer, current_filesize) = open_log_file(config.path())?;

        Ok(FileSink {
            config,
            writer: Some(writer),
            current_filesize,
            clock,
            trap,
        })
    }
}

/// A sink appending lines to a file, moving the file aside once it grows past a size threshold.
#[derive(Debug)]
pub struct FileSink {
    config: SinkConfig,
    // None only between a failed reopen after rotation and the next successful one.
    writer: Option<File>,
    current_filesize: u64,
    clock: Clock,
    trap: Arc<dyn Trap>,
}

impl FileSink {
    /// Open a file sink with the default trap.
    pub fn open(config: SinkConfig) -> Result<FileSink, Error> {
        FileSinkBuilder::new(config).build()
    }

    /// Creates a new [`FileSinkBuilder`].
    #[must_use]
    pub fn builder(config: SinkConfig) -> FileSinkBuilder {
        FileSinkBuilder::new(config)
    }

    fn format(&self, line: &Line) -> String {
        let mut buf = String::with_capacity(line.text().len() + 21);
        if let Some(ts) = line.timestamp() {
            buf.push_str(&format_timestamp(ts, LINE_TIMESTAMP_FORMAT));
            buf.push(' ');
        }
        buf.push_str(line.text());
        buf.push('\n');
        buf
    }

    fn should_rollover(&self, incoming: usize) -> bool {
        let max_size = self.config.move_size_kb().saturating_mul(1024);
        max_size > 0
            && self.current_filesize > 0
            && self.current_filesize.saturating_add(incoming as u64) > max_size
    }

    fn rollover(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                let err = Error::new(ErrorKind::SinkWrite, "failed to flush rotated log file")
                    .with_source(err);
                self.trap.trap(&err);
            }
        }

        let target = self.rotated_path();
        let moved = match fs::rename(self.config.path(), &target) {
            Ok(()) => true,
            Err(err) => {
                let err = Error::new(ErrorKind::SinkWrite, "failed to move rotated log file")
                    .with_context("from", self.config.path().display())
                    .with_context("to", target.display())
                    .with_source(err);
                self.trap.trap(&err);
                false
            }
        };

        match open_log_file(self.config.path()) {
            // a file that could not be moved is retried after another threshold's worth of bytes
            Ok((writer, size)) => {
                self.writer = Some(writer);
                self.current_filesize = if moved { size } else { 0 };
            }
            Err(err) => self.trap.trap(&err),
        }
    }

    fn rotated_path(&self) -> PathBuf {
        let path = self.config.path();
        let dir = match self.config.move_directory() {
            Some(dir) => dir.to_path_buf(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path.extension().map(|s| s.to_string_lossy().into_owned());
        let date = format_timestamp(self.clock.now(), ROTATED_NAME_FORMAT);

        let mut cnt = 0;
        loop {
            let filename = match (&ext, cnt) {
                (Some(ext), 0) => format!("{stem}.{date}.{ext}"),
                (Some(ext), n) => format!("{stem}.{date}.{n}.{ext}"),
                (None, 0) => format!("{stem}.{date}"),
                (None, n) => format!("{stem}.{date}.{n}"),
            };
            let candidate = dir.join(filename);
            if !candidate.exists() {
                return candidate;
            }
            cnt += 1;
        }
    }
}

impl Sink for FileSink {
    fn write(&mut self, line: &Line) -> Result<(), Error> {
        let bytes = self.format(line);
        if self.should_rollover(bytes.len()) {
            self.rollover();
        }

        if self.writer.is_none() {
            let (writer, size) = open_log_file(self.config.path()).map_err(|err| {
                Error::new(ErrorKind::SinkWrite, "failed to reopen log file").with_source(err)
            })?;
            self.writer = Some(writer);
            self.current_filesize = size;
        }

        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_all(bytes.as_bytes()),
            None => Err(io::Error::other("log file is not open")),
        };
        result.map_err(|err| {
            Error::from_write_error(err).with_context("path", self.config.path().display())
        })?;
        self.current_filesize += bytes.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush().map_err(Error::from_write_error),
            None => Ok(()),
        }
    }

    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn configure(&mut self, config: &SinkConfig) -> Result<(), Error> {
        if let Some(dir) = config.move_directory() {
            create_dir(dir)?;
        }

        if config.path() != self.config.path() {
            let (writer, size) = open_log_file(config.path())?;
            if let Some(mut previous) = self.writer.replace(writer) {
                if let Err(err) = previous.flush() {
                    let err = Error::new(ErrorKind::SinkWrite, "failed to flush previous log file")
                        .with_source(err);
                    self.trap.trap(&err);
                }
            }
            self.current_filesize = size;
        }

        self.config = config.clone();
        Ok(())
    }

    fn fork(&self) -> Result<Box<dyn Sink>, Error> {
        let sink = FileSinkBuilder {
            config: self.config.clone(),
            clock: self.clock.clone(),
            trap: self.trap.clone(),
        }
        .build()?;
        Ok(Box::new(sink))
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                let err = Error::new(ErrorKind::SinkWrite, "failed to flush file sink on dropped")
                    .with_source(err);
                self.trap.trap(&err);
            }
        }
    }
}

pub(crate) fn format_timestamp(ts: Timestamp, format: &str) -> String {
    ts.to_zoned(TimeZone::system()).strftime(format).to_string()
}

fn create_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|err| {
        Error::from_config_error(err).with_context("directory", dir.display())
    })
}

fn open_log_file(path: &Path) -> Result<(File, u64), Error> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            create_dir(dir)?;
        }
    }

    let open = || -> io::Result<(File, u64)> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    };
    open().map_err(|err| Error::from_config_error(err).with_context("path", path.display()))
}
