//! Coalesced logging for high-frequency progress lines.

use log::Level;
use std::time::{Duration, Instant};

/// Emits at most one line per interval; the newest suppressed line is kept
/// and written by `flush` (or on drop).
pub struct CoalescedLog {
    level: Level,
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<String>,
    emitted: usize,
}

impl CoalescedLog {
    pub fn new(level: Level, interval: Duration) -> Self {
        Self {
            level,
            interval,
            last_emit: None,
            pending: None,
            emitted: 0,
        }
    }

    /// One line per second at `level`.
    pub fn per_second(level: Level) -> Self {
        Self::new(level, Duration::from_secs(1))
    }

    /// Returns whether the line was written immediately.
    pub fn log(&mut self, line: impl Into<String>) -> bool {
        let now = Instant::now();
        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.pending = None;
            self.emit(line.into());
            self.last_emit = Some(now);
            true
        } else {
            self.pending = Some(line.into());
            false
        }
    }

    pub fn flush(&mut self) {
        if let Some(line) = self.pending.take() {
            self.emit(line);
            self.last_emit = Some(Instant::now());
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn emit(&mut self, line: String) {
        log::log!(self.level, "{}", line);
        self.emitted += 1;
    }
}

impl Drop for CoalescedLog {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_collapse_into_one_line_plus_flush() {
        let mut log = CoalescedLog::new(Level::Debug, Duration::from_secs(60));
        assert!(log.log("1%"));
        for pct in 2..50 {
            assert!(!log.log(format!("{}%", pct)));
        }
        assert_eq!(log.emitted(), 1);
        log.flush();
        assert_eq!(log.emitted(), 2);
        log.flush();
        assert_eq!(log.emitted(), 2);
    }

    #[test]
    fn zero_interval_emits_everything() {
        let mut log = CoalescedLog::new(Level::Trace, Duration::ZERO);
        for i in 0..5 {
            assert!(log.log(i.to_string()));
        }
        assert_eq!(log.emitted(), 5);
    }
}
