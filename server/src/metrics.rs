// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chat_stream::Mode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::SessionOutcome;

/// Samples kept per series for percentile calculation
const SAMPLE_WINDOW: usize = 1000;

/// Latency series: running aggregates plus a bounded sample window.
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
        }
    }
}

impl LatencyStats {
    pub fn record(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        // Never wait on the window; a contended sample is dropped.
        if let Ok(mut samples) = self.samples.try_lock() {
            if samples.len() == SAMPLE_WINDOW {
                samples.pop_front();
            }
            samples.push_back(ms);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return LatencySnapshot::default();
        }
        let mut sorted: Vec<u64> = match self.samples.lock() {
            Ok(samples) => samples.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        };
        sorted.sort_unstable();

        LatencySnapshot {
            count,
            avg_ms: self.total_ms.load(Ordering::Relaxed) as f64 / count as f64,
            min_ms: self.min_ms.load(Ordering::Relaxed),
            max_ms: self.max_ms.load(Ordering::Relaxed),
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
        }
    }
}

fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (sorted.len() * p / 100).min(sorted.len() - 1);
    sorted[index]
}

/// Call outcomes for one upstream provider.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    latency: LatencyStats,
}

impl ProviderMetrics {
    pub fn record_success(&self, elapsed: Duration) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.latency.record(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.failure.fetch_add(1, Ordering::Relaxed);
        self.latency.record(elapsed);
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Passive recorder for the chat pipeline. Recording never blocks.
#[derive(Debug)]
pub struct PipelineMetrics {
    started: Instant,
    requests: AtomicU64,
    first_chunk_text: LatencyStats,
    first_chunk_voice: LatencyStats,
    pub generation: ProviderMetrics,
    pub synthesis: ProviderMetrics,
    pub fallback_generation: ProviderMetrics,
    completed: AtomicU64,
    failed: AtomicU64,
    disconnected: AtomicU64,
    cancelled: AtomicU64,
    fallback_served: AtomicU64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            first_chunk_text: LatencyStats::default(),
            first_chunk_voice: LatencyStats::default(),
            generation: ProviderMetrics::default(),
            synthesis: ProviderMetrics::default(),
            fallback_generation: ProviderMetrics::default(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            fallback_served: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_first_chunk(&self, mode: Mode, elapsed: Duration) {
        match mode {
            Mode::Text => self.first_chunk_text.record(elapsed),
            Mode::Voice => self.first_chunk_voice.record(elapsed),
        }
    }

    pub fn record_outcome(&self, outcome: SessionOutcome) {
        let counter = match outcome {
            SessionOutcome::Completed => &self.completed,
            SessionOutcome::Failed => &self.failed,
            SessionOutcome::Disconnected => &self.disconnected,
            SessionOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_served(&self) {
        self.fallback_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            first_chunk_text: self.first_chunk_text.snapshot(),
            first_chunk_voice: self.first_chunk_voice.snapshot(),
            generation: self.generation.snapshot(),
            synthesis: self.synthesis.snapshot(),
            fallback_generation: self.fallback_generation.snapshot(),
            sessions: SessionCounts {
                completed: self.completed.load(Ordering::Relaxed),
                failed: self.failed.load(Ordering::Relaxed),
                disconnected: self.disconnected.load(Ordering::Relaxed),
                cancelled: self.cancelled.load(Ordering::Relaxed),
                fallback_served: self.fallback_served.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub latency: LatencySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCounts {
    pub completed: u64,
    pub failed: u64,
    pub disconnected: u64,
    pub cancelled: u64,
    pub fallback_served: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub first_chunk_text: LatencySnapshot,
    pub first_chunk_voice: LatencySnapshot,
    pub generation: ProviderSnapshot,
    pub synthesis: ProviderSnapshot,
    pub fallback_generation: ProviderSnapshot,
    pub sessions: SessionCounts,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub pipeline: PipelineSnapshot,
}
