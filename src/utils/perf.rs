//! Performance monitoring utilities
//!
//! Tracks per-stage latency over a sliding window and summarises an
//! orchestrator's lifetime for `performance_stats()`.

use crate::component::ErrorClass;
use crate::integration::state::ApplicationState;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Tracks timing metrics over a sliding window
#[derive(Debug, Clone)]
pub struct TimingTracker {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl TimingTracker {
    /// Create a new timing tracker with the specified window size
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a new timing sample
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Get the average duration
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    pub fn min(&self) -> Duration {
        self.samples.iter().min().copied().unwrap_or(Duration::ZERO)
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or(Duration::ZERO)
    }

    /// Get the 95th percentile duration
    pub fn percentile_95(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.samples.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Duration> {
        self.samples.iter()
    }
}

/// Per-stage latency trackers, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct StageTimings {
    pub recognition: TimingTracker,
    pub generation: TimingTracker,
    pub synthesis: TimingTracker,
    pub playback: TimingTracker,
    /// Release to start of speech
    pub response: TimingTracker,
}

impl StageTimings {
    pub fn new(window: usize) -> Self {
        Self {
            recognition: TimingTracker::new(window),
            generation: TimingTracker::new(window),
            synthesis: TimingTracker::new(window),
            playback: TimingTracker::new(window),
            response: TimingTracker::new(window),
        }
    }
}

/// Running counters collected across interaction cycles
#[derive(Debug, Clone)]
pub struct CycleCounters {
    pub started_at: Instant,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub fallbacks_spoken: u64,
    pub playback_timeouts: u64,
    pub processing_timeouts: u64,
    /// Presses and releases dropped because a cycle was in flight
    pub ignored_inputs: u64,
    pub failures_by_class: HashMap<ErrorClass, u64>,
    pub timings: StageTimings,
}

impl CycleCounters {
    pub fn new(window: usize) -> Self {
        Self {
            started_at: Instant::now(),
            cycles_completed: 0,
            cycles_failed: 0,
            fallbacks_spoken: 0,
            playback_timeouts: 0,
            processing_timeouts: 0,
            ignored_inputs: 0,
            failures_by_class: HashMap::new(),
            timings: StageTimings::new(window),
        }
    }

    pub fn record_failure(&mut self, class: ErrorClass) {
        self.cycles_failed += 1;
        *self.failures_by_class.entry(class).or_insert(0) += 1;
    }

    pub fn snapshot(&self, state: ApplicationState) -> PerformanceStats {
        let response = &self.timings.response;
        PerformanceStats {
            uptime: self.started_at.elapsed(),
            current_state: state,
            cycles_completed: self.cycles_completed,
            cycles_failed: self.cycles_failed,
            fallbacks_spoken: self.fallbacks_spoken,
            playback_timeouts: self.playback_timeouts,
            processing_timeouts: self.processing_timeouts,
            ignored_inputs: self.ignored_inputs,
            failures_by_class: self.failures_by_class.clone(),
            average_response_time: response.average(),
            min_response_time: response.min(),
            max_response_time: response.max(),
            p95_response_time: response.percentile_95(),
            response_times: response.samples().copied().collect(),
            recognition_avg: self.timings.recognition.average(),
            generation_avg: self.timings.generation.average(),
            synthesis_avg: self.timings.synthesis.average(),
            playback_avg: self.timings.playback.average(),
        }
    }
}

/// Point-in-time performance report
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub uptime: Duration,
    pub current_state: ApplicationState,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub fallbacks_spoken: u64,
    pub playback_timeouts: u64,
    pub processing_timeouts: u64,
    pub ignored_inputs: u64,
    pub failures_by_class: HashMap<ErrorClass, u64>,
    pub average_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
    pub p95_response_time: Duration,
    pub response_times: Vec<Duration>,
    pub recognition_avg: Duration,
    pub generation_avg: Duration,
    pub synthesis_avg: Duration,
    pub playback_avg: Duration,
}

impl PerformanceStats {
    pub fn failures_of(&self, class: ErrorClass) -> u64 {
        self.failures_by_class.get(&class).copied().unwrap_or(0)
    }

    /// Generate a performance summary string
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("state: {}", self.current_state),
            format!("uptime: {}s", self.uptime.as_secs()),
            format!("cycles: {}/{} ok", self.cycles_completed, self.cycles_completed + self.cycles_failed),
        ];

        if !self.response_times.is_empty() {
            parts.push(format!(
                "response: avg {}ms p95 {}ms",
                self.average_response_time.as_millis(),
                self.p95_response_time.as_millis()
            ));
            parts.push(format!(
                "STT: {}ms | LLM: {}ms | TTS: {}ms",
                self.recognition_avg.as_millis(),
                self.generation_avg.as_millis(),
                self.synthesis_avg.as_millis()
            ));
        }

        parts.join(" | ")
    }
}
