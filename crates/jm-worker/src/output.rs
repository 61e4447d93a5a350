//! Recent output of the job and what can be read from it

use std::collections::VecDeque;
use std::sync::Mutex;

use jm_core::config::LivenessConfig;
use jm_core::time::unix_now;

/// Fixed-capacity buffer that drops its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, evicting the oldest one if the buffer is full
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Most recent item
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Items from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of items held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
struct LogState {
    lines: RingBuffer<String>,
    last_line_at: f64,
    longest_gap: f64,
    warnings: u64,
    sim_time: Option<f64>,
    create_time: Option<f64>,
    last_time_step_at: Option<f64>,
}

/// Output log of one job
///
/// Fed line by line by whoever reads the job's output; read by the RPC
/// handlers. The lock is never held across an await point.
#[derive(Debug)]
pub struct OutputLog {
    state: Mutex<LogState>,
    liveness: LivenessConfig,
}

impl OutputLog {
    /// Empty log keeping the last `capacity` lines
    pub fn new(capacity: usize, liveness: LivenessConfig) -> Self {
        Self::starting_at(capacity, liveness, unix_now())
    }

    fn starting_at(capacity: usize, liveness: LivenessConfig, now: f64) -> Self {
        Self {
            state: Mutex::new(LogState {
                lines: RingBuffer::new(capacity),
                last_line_at: now,
                longest_gap: 0.0,
                warnings: 0,
                sim_time: None,
                create_time: None,
                last_time_step_at: None,
            }),
            liveness,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LogState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Record one output line
    pub fn insert(&self, line: &str) {
        self.insert_at(line, unix_now());
    }

    fn insert_at(&self, line: &str, now: f64) {
        let line = line.trim_end_matches(['\r', '\n']);
        let step = parse_time_step(line);
        let warning = line.to_ascii_lowercase().contains("warning");

        self.with_state(|state| {
            let gap = now - state.last_line_at;
            if gap > state.longest_gap {
                state.longest_gap = gap;
            }
            state.last_line_at = now;

            if warning {
                state.warnings += 1;
            }
            if let Some(time) = step {
                state.sim_time = Some(time);
                state.create_time.get_or_insert(time);
                state.last_time_step_at = Some(now);
            }

            state.lines.push(line.to_string());
        });
    }

    /// Most recent line, empty when nothing was output yet
    pub fn last_line(&self) -> String {
        self.with_state(|state| state.lines.last().cloned().unwrap_or_default())
    }

    /// Buffered lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.with_state(|state| state.lines.iter().cloned().collect())
    }

    /// Buffered lines as one text, each terminated by a newline
    pub fn tail(&self) -> String {
        self.with_state(|state| {
            state.lines.iter().fold(String::new(), |mut text, line| {
                text.push_str(line);
                text.push('\n');
                text
            })
        })
    }

    /// Seconds since the last line (or since start without output)
    pub fn seconds_since_output(&self) -> f64 {
        self.seconds_since_output_at(unix_now())
    }

    fn seconds_since_output_at(&self, now: f64) -> f64 {
        self.with_state(|state| (now - state.last_line_at).max(0.0))
    }

    /// Whether the job still produces output at its usual pace
    ///
    /// True while the silence is shorter than the longest gap seen so far
    /// (at least `max_time_start`) times the margin.
    pub fn is_living(&self) -> bool {
        self.is_living_at(unix_now())
    }

    fn is_living_at(&self, now: f64) -> bool {
        let max_time_start = self.liveness.max_time_start.as_secs_f64();
        let margin = self.liveness.margin;
        self.with_state(|state| {
            let threshold = state.longest_gap.max(max_time_start) * margin;
            now - state.last_line_at < threshold
        })
    }

    /// Number of lines mentioning a warning
    pub fn warnings(&self) -> u64 {
        self.with_state(|state| state.warnings)
    }

    /// Latest simulated time, 0 before the first time step
    pub fn sim_time(&self) -> f64 {
        self.with_state(|state| state.sim_time.unwrap_or(0.0))
    }

    /// First simulated time seen, 0 before the first time step
    pub fn create_time(&self) -> f64 {
        self.with_state(|state| state.create_time.unwrap_or(0.0))
    }

    /// Unix time of the last line
    pub fn last_line_seen(&self) -> f64 {
        self.with_state(|state| state.last_line_at)
    }

    /// Unix time of the last time step, 0 before the first
    pub fn last_time_step_seen(&self) -> f64 {
        self.with_state(|state| state.last_time_step_at.unwrap_or(0.0))
    }
}

/// Simulated time announced by a `Time = <t>` line
fn parse_time_step(line: &str) -> Option<f64> {
    line.trim()
        .strip_prefix("Time = ")
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn liveness() -> LivenessConfig {
        LivenessConfig {
            max_time_start: Duration::from_secs(30),
            margin: 1.1,
        }
    }

    #[test]
    fn test_ring_keeps_last_lines_oldest_first() {
        let mut ring = RingBuffer::new(3);
        for i in 0..10 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(ring.last(), Some(&9));
    }

    #[test]
    fn test_ring_zero_capacity() {
        let mut ring = RingBuffer::new(0);
        ring.push("x");
        assert!(ring.is_empty());
        assert_eq!(ring.last(), None);
    }

    #[test]
    fn test_log_bound_and_tail() {
        let log = OutputLog::new(100, liveness());
        for i in 0..250 {
            log.insert(&format!("line {}\n", i));
        }

        let lines = log.lines();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line 150");
        assert_eq!(lines[99], "line 249");
        assert_eq!(log.last_line(), "line 249");
        assert!(log.tail().starts_with("line 150\nline 151\n"));
        assert!(log.tail().ends_with("line 249\n"));
    }

    #[test]
    fn test_empty_log() {
        let log = OutputLog::new(10, liveness());
        assert_eq!(log.last_line(), "");
        assert_eq!(log.tail(), "");
        assert_eq!(log.sim_time(), 0.0);
    }

    #[test]
    fn test_time_steps_and_warnings() {
        let log = OutputLog::new(10, liveness());
        log.insert("Time = 0.005");
        log.insert("--> FOAM Warning : something odd");
        log.insert("Time = 0.01");

        assert_eq!(log.sim_time(), 0.01);
        assert_eq!(log.create_time(), 0.005);
        assert_eq!(log.warnings(), 1);
        assert!(log.last_time_step_seen() > 0.0);
    }

    #[test]
    fn test_liveness_uses_start_threshold() {
        let log = OutputLog::starting_at(10, liveness(), 1000.0);
        assert!(log.is_living_at(1020.0));
        // 30 s * 1.1
        assert!(log.is_living_at(1032.0));
        assert!(!log.is_living_at(1034.0));
    }

    #[test]
    fn test_liveness_learns_longest_gap() {
        let log = OutputLog::starting_at(10, liveness(), 1000.0);
        log.insert_at("slow step", 1100.0);
        assert_eq!(log.seconds_since_output_at(1150.0), 50.0);

        // Longest gap is now 100 s, threshold 110 s
        assert!(log.is_living_at(1200.0));
        assert!(!log.is_living_at(1211.0));
    }
}
