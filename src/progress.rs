//! Logging and progress reporting sink
//!
//! Every long-running operation takes a `&dyn ProgressSink` instead of using a
//! shared logger. [`LogSink`] forwards to the `log` facade with the indented
//! `|----->` message style; [`NullSink`] drops everything.

use std::cell::Cell;
use std::time::Instant;

const INDENT_WIDTH: usize = 6;

/// Severity of a message sent to a [`ProgressSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warning,
}

/// Receiver of log messages and percent-complete updates
pub trait ProgressSink {
    fn message(&self, level: Level, indent: usize, msg: &str);

    /// Called with the completed percentage (0..=100) of a named task
    fn progress(&self, task: &str, percent: u32);

    /// Called once when a named task completes
    fn finish(&self, task: &str);

    fn debug(&self, msg: &str) {
        self.message(Level::Debug, 1, msg);
    }

    fn info(&self, msg: &str) {
        self.message(Level::Info, 1, msg);
    }

    fn warning(&self, msg: &str) {
        self.message(Level::Warning, 1, msg);
    }

    fn info_indent(&self, msg: &str, indent: usize) {
        self.message(Level::Info, indent, msg);
    }

    /// Announce that a derived column is written into a container attribute
    fn info_insert(&self, key: &str, attr: &str) {
        self.info(&format!("<insert> {} to {} in annotated matrix.", key, attr));
    }
}

/// Format a message with the indentation prefix used across the crate
pub fn format_message(level: Level, indent: usize, msg: &str) -> String {
    let dashes = "-".repeat(INDENT_WIDTH * indent.max(1));
    let mut prefix = format!("|{}", &dashes[1..]);
    match level {
        Level::Info => prefix.push('>'),
        Level::Warning => prefix.push('?'),
        Level::Debug => {}
    }
    format!("{} {}", prefix, msg)
}

/// Sink forwarding to the `log` facade
#[derive(Debug)]
pub struct LogSink {
    started: Cell<Option<Instant>>,
    last_percent: Cell<Option<u32>>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self {
            started: Cell::new(None),
            last_percent: Cell::new(None),
        }
    }
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogSink {
    fn message(&self, level: Level, indent: usize, msg: &str) {
        let line = format_message(level, indent, msg);
        match level {
            Level::Debug => log::debug!("{}", line),
            Level::Info => log::info!("{}", line),
            Level::Warning => log::warn!("{}", line),
        }
    }

    fn progress(&self, task: &str, percent: u32) {
        if self.started.get().is_none() {
            self.started.set(Some(Instant::now()));
        }
        if self.last_percent.get() == Some(percent) {
            return;
        }
        self.last_percent.set(Some(percent));
        log::debug!("{}", format_message(Level::Info, 1, &format!("{} in progress: {}%", task, percent)));
    }

    fn finish(&self, task: &str) {
        let elapsed = self
            .started
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.last_percent.set(None);
        self.info(&format!("{} finished [{:.4}s]", task, elapsed));
    }
}

/// Sink that discards every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn message(&self, _level: Level, _indent: usize, _msg: &str) {}
    fn progress(&self, _task: &str, _percent: u32) {}
    fn finish(&self, _task: &str) {}
}

/// Converts step counts into percent updates on a sink
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    task: &'a str,
    total: usize,
    last: u32,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink, task: &'a str, total: usize) -> Self {
        sink.progress(task, 0);
        Self {
            sink,
            task,
            total: total.max(1),
            last: 0,
        }
    }

    /// Record that `done` steps out of the total have completed
    pub fn update(&mut self, done: usize) {
        let percent = ((done.min(self.total) * 100) / self.total) as u32;
        if percent != self.last {
            self.last = percent;
            self.sink.progress(self.task, percent);
        }
    }

    pub fn finish(self) {
        if self.last != 100 {
            self.sink.progress(self.task, 100);
        }
        self.sink.finish(self.task);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Sink recording every call, for assertions in tests
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub messages: RefCell<Vec<(Level, String)>>,
        pub percents: RefCell<Vec<u32>>,
        pub finished: RefCell<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn message(&self, level: Level, _indent: usize, msg: &str) {
            self.messages.borrow_mut().push((level, msg.to_string()));
        }
        fn progress(&self, _task: &str, percent: u32) {
            self.percents.borrow_mut().push(percent);
        }
        fn finish(&self, task: &str) {
            self.finished.borrow_mut().push(task.to_string());
        }
    }

    impl RecordingSink {
        pub fn warnings(&self) -> Vec<String> {
            self.messages
                .borrow()
                .iter()
                .filter(|(l, _)| *l == Level::Warning)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[test]
    fn test_format_message_prefixes() {
        assert_eq!(format_message(Level::Info, 1, "hello"), "|-----> hello");
        assert_eq!(format_message(Level::Warning, 1, "careful"), "|-----? careful");
        assert_eq!(format_message(Level::Info, 2, "nested"), "|-----------> nested");
    }

    #[test]
    fn test_tracker_reports_monotone_percent_and_finishes() {
        let sink = RecordingSink::default();
        let mut tracker = ProgressTracker::new(&sink, "task", 8);
        for i in 1..=8 {
            tracker.update(i);
        }
        tracker.finish();
        let percents = sink.percents.borrow();
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sink.finished.borrow().as_slice(), &["task".to_string()]);
    }
}
