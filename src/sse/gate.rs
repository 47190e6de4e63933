//! Windowed fail-fast evaluator (spec §4.D "Gates").
//!
//! Continuously computes resume-success rate, trim rate, and max resume
//! latency over a rolling window; raises fail-fast once a window has enough
//! samples and crosses a threshold.

use axum::http::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub enum EventClass {
    Server5xx,
    Client400,
    Client401,
    RateLimit429,
    Transport,
}

impl EventClass {
    pub fn bucket(&self) -> &'static str {
        match self {
            EventClass::Server5xx => "server_5xx",
            EventClass::Client400 => "client_400",
            EventClass::Client401 => "client_401",
            EventClass::RateLimit429 => "rate_limit_429",
            EventClass::Transport => "transport",
        }
    }

    /// Classify an HTTP response status as observed on a resume/stream call
    /// (spec §4.D "Event classification"). Status codes with no dedicated
    /// bucket (e.g. 403) fall into `Client400` as a generic client-error
    /// bucket.
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            EventClass::Client401
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            EventClass::RateLimit429
        } else if status.is_server_error() {
            EventClass::Server5xx
        } else {
            EventClass::Client400
        }
    }
}

#[derive(Debug, Clone)]
struct ResumeSample {
    at: Instant,
    success: bool,
    latency: Duration,
}

#[derive(Debug, Clone)]
struct StreamSample {
    at: Instant,
    trimmed: bool,
}

#[derive(Debug, Clone, Copy)]
struct EventSample {
    at: Instant,
    class: &'static str,
}

pub struct FailFastGate {
    window: Duration,
    min_resume_samples: usize,
    min_trim_streams: usize,
    resume_samples: VecDeque<ResumeSample>,
    stream_samples: VecDeque<StreamSample>,
    event_samples: VecDeque<EventSample>,
}

#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub resume_success_rate: Option<f64>,
    pub trim_rate: Option<f64>,
    pub max_resume_latency: Option<Duration>,
    pub event_counts: HashMap<&'static str, usize>,
}

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

impl FailFastGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            min_resume_samples: 3,
            min_trim_streams: 2,
            resume_samples: VecDeque::new(),
            stream_samples: VecDeque::new(),
            event_samples: VecDeque::new(),
        }
    }

    pub fn record_resume(&mut self, success: bool, latency: Duration) {
        self.resume_samples.push_back(ResumeSample {
            at: Instant::now(),
            success,
            latency,
        });
        self.evict();
    }

    pub fn record_stream_completion(&mut self, trimmed: bool) {
        self.stream_samples.push_back(StreamSample {
            at: Instant::now(),
            trimmed,
        });
        self.evict();
    }

    /// Tally a transport error, resume 4xx, or origin 5xx into its window
    /// bucket (spec §4.D "Event classification").
    pub fn record_event(&mut self, class: EventClass) {
        self.event_samples.push_back(EventSample {
            at: Instant::now(),
            class: class.bucket(),
        });
        self.evict();
    }

    fn evict(&mut self) {
        let cutoff = Instant::now() - self.window;
        while self.resume_samples.front().map(|s| s.at < cutoff).unwrap_or(false) {
            self.resume_samples.pop_front();
        }
        while self.stream_samples.front().map(|s| s.at < cutoff).unwrap_or(false) {
            self.stream_samples.pop_front();
        }
        while self.event_samples.front().map(|s| s.at < cutoff).unwrap_or(false) {
            self.event_samples.pop_front();
        }
    }

    pub fn stats(&self) -> WindowStats {
        let mut stats = WindowStats::default();
        if self.resume_samples.len() >= self.min_resume_samples {
            let successes = self.resume_samples.iter().filter(|s| s.success).count();
            stats.resume_success_rate = Some(successes as f64 / self.resume_samples.len() as f64);
            stats.max_resume_latency = self.resume_samples.iter().map(|s| s.latency).max();
        }
        if self.stream_samples.len() >= self.min_trim_streams {
            let trimmed = self.stream_samples.iter().filter(|s| s.trimmed).count();
            stats.trim_rate = Some(trimmed as f64 / self.stream_samples.len() as f64);
        }
        for sample in &self.event_samples {
            *stats.event_counts.entry(sample.class).or_insert(0) += 1;
        }
        stats
    }

    /// Evaluate the dev-window fail-fast thresholds (spec §4.D): resume
    /// success < 95%, trim rate > 1%, any resume latency > 15s, or 3+
    /// transport/origin-5xx events within the window.
    pub fn should_fail_fast(&self) -> bool {
        let stats = self.stats();
        if let Some(rate) = stats.resume_success_rate {
            if rate < 0.95 {
                return true;
            }
        }
        if let Some(rate) = stats.trim_rate {
            if rate > 0.01 {
                return true;
            }
        }
        if let Some(latency) = stats.max_resume_latency {
            if latency > Duration::from_secs(15) {
                return true;
            }
        }
        let hard_failures = stats.event_counts.get(EventClass::Server5xx.bucket()).copied().unwrap_or(0)
            + stats.event_counts.get(EventClass::Transport.bucket()).copied().unwrap_or(0);
        if hard_failures >= 3 {
            return true;
        }
        false
    }
}
