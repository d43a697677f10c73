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

use jiff::Timestamp;

/// A single buffered log line.
///
/// The timestamp is captured when the line is appended, not when it is flushed, so a line keeps
/// the time of the event even if it sits in the queue for a whole flush period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    timestamp: Option<Timestamp>,
}

impl Line {
    /// Create a line without a timestamp.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: None,
        }
    }

    /// Create a line stamped with the given instant.
    pub fn stamped(text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            text: text.into(),
            timestamp: Some(timestamp),
        }
    }

    /// The text of this line, without a trailing newline.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The instant this line was appended at, if timestamps were enabled.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }
}

/// In-memory FIFO of lines not yet handed to the sink.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    lines: Vec<Line>,
}

impl PendingQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, line: Line) {
        self.lines.push(line);
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.lines.reserve(additional);
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.lines.capacity()
    }

    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub(crate) fn into_lines(self) -> std::vec::IntoIter<Line> {
        self.lines.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keeps_insertion_order_and_duplicates() {
        let mut queue = PendingQueue::with_capacity(4);
        assert!(queue.is_empty());

        for text in ["b", "a", "a", "c"] {
            queue.push(Line::new(text));
        }
        assert_eq!(queue.len(), 4);

        let texts = queue
            .into_lines()
            .map(|line| line.text().to_string())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["b", "a", "a", "c"]);
    }
}
