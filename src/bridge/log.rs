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

use log::LevelFilter;

use crate::ThreadedLogger;

/// A [`log::Log`] implementation that appends every enabled record to a [`ThreadedLogger`].
///
/// Records are written as `LEVEL target: message`. Since a global logger is never dropped, call
/// [`log::logger().flush()`](log::Log::flush) before the process exits to write out what is
/// still buffered.
#[derive(Debug)]
pub struct LogBridge {
    logger: ThreadedLogger,
    filter: LevelFilter,
}

impl LogBridge {
    /// Create a bridge passing every level through.
    pub fn new(logger: ThreadedLogger) -> Self {
        Self {
            logger,
            filter: LevelFilter::Trace,
        }
    }

    /// Set the most verbose level forwarded to the logger.
    #[must_use]
    pub fn filter(mut self, filter: LevelFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The wrapped logger.
    pub fn logger(&self) -> &ThreadedLogger {
        &self.logger
    }

    /// Set up the log crate global logger.
    ///
    /// This function calls [`log::set_boxed_logger`] with this bridge and sets the global maximum
    /// log level to the bridge's filter.
    ///
    /// # Errors
    ///
    /// Return an error if the log crate global logger has already been set.
    pub fn try_setup(self) -> Result<(), log::SetLoggerError> {
        let filter = self.filter;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(filter);
        Ok(())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &log::Record) {
        if !log::Log::enabled(self, record.metadata()) {
            return;
        }

        let line = format!(
            "{:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        if let Err(err) = self.logger.append(line) {
            self.logger.trap().trap(&err);
        }
    }

    fn flush(&self) {
        // flush errors have been trapped already
        let _ = self.logger.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use log::Level;
    use log::Log;

    use super::*;
    use crate::Error;
    use crate::ErrorKind;
    use crate::Line;
    use crate::scheduler::Registration;
    use crate::scheduler::Scheduler;
    use crate::scheduler::Task;
    use crate::sink::Sink;
    use crate::sink::SinkConfig;
    use crate::trap::Trap;

    #[derive(Debug)]
    struct VecSink {
        config: SinkConfig,
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Sink for VecSink {
        fn write(&mut self, line: &Line) -> Result<(), Error> {
            self.lines.lock().unwrap().push(line.text().to_string());
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

    #[derive(Debug)]
    struct IdleScheduler;

    impl Scheduler for IdleScheduler {
        fn register(&self, _: Duration, _: Arc<dyn Task>) -> Result<Registration, Error> {
            Ok(Registration::new(0))
        }

        fn unregister(&self, _: Registration) {}
    }

    #[derive(Debug)]
    struct CollectingTrap(Arc<Mutex<Vec<ErrorKind>>>);

    impl Trap for CollectingTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push(err.kind());
        }
    }

    type Captured<T> = Arc<Mutex<Vec<T>>>;

    fn bridge(filter: LevelFilter) -> (LogBridge, Captured<String>, Captured<ErrorKind>) {
        let lines = Arc::new(Mutex::new(vec![]));
        let trapped = Arc::new(Mutex::new(vec![]));
        let sink = VecSink {
            config: SinkConfig::new("unused.log"),
            lines: lines.clone(),
        };
        let logger = ThreadedLogger::builder(sink)
            .trap(CollectingTrap(trapped.clone()))
            .build(Arc::new(IdleScheduler))
            .unwrap();
        (LogBridge::new(logger).filter(filter), lines, trapped)
    }

    fn log_at(bridge: &LogBridge, level: Level, message: &str) {
        bridge.log(
            &log::Record::builder()
                .level(level)
                .target("game")
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn test_records_are_formatted_and_filtered() {
        let (bridge, lines, _) = bridge(LevelFilter::Info);

        log_at(&bridge, Level::Info, "map loaded");
        log_at(&bridge, Level::Debug, "too chatty");
        log_at(&bridge, Level::Error, "player kicked");
        bridge.flush();

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["INFO  game: map loaded", "ERROR game: player kicked"]
        );
    }

    #[test]
    fn test_closed_logger_errors_are_trapped() {
        let (bridge, lines, trapped) = bridge(LevelFilter::Trace);
        bridge.logger().close().unwrap();

        log_at(&bridge, Level::Warn, "after close");

        assert!(lines.lock().unwrap().is_empty());
        assert_eq!(*trapped.lock().unwrap(), vec![ErrorKind::Closed]);
    }
}
