//! Request counters.
//!
//! # Metrics
//! - `http.ok.responses` (counter): fixed-status responses by method, path
//! - `http.panic.responses` (counter): recovered handler faults by method, path
//!
//! # Design Decisions
//! - Every increment goes to the OpenTelemetry instrument for export and to an
//!   in-process tally read by the diagnostics surface
//! - The tally is a concurrent map of atomics: increments from any number of
//!   requests are never lost and never reset

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use serde::Serialize;

pub const OK_RESPONSES: &str = "http.ok.responses";
pub const PANIC_RESPONSES: &str = "http.panic.responses";

/// A monotonically increasing counter keyed by `(method, path)`.
#[derive(Clone)]
pub struct RequestCounter {
    name: &'static str,
    instrument: Counter<u64>,
    tally: Arc<DashMap<(String, String), AtomicU64>>,
}

/// One `(method, path)` series of a [`RequestCounter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    pub method: String,
    pub path: String,
    pub count: u64,
}

impl RequestCounter {
    pub fn new(meter: &Meter, name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            instrument: meter.u64_counter(name).with_description(description).build(),
            tally: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record one occurrence for `method` and `path`.
    pub fn increment(&self, method: &str, path: &str) {
        self.instrument.add(
            1,
            &[
                KeyValue::new("method", method.to_owned()),
                KeyValue::new("path", path.to_owned()),
            ],
        );

        let key = (method.to_owned(), path.to_owned());
        if let Some(count) = self.tally.get(&key) {
            count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.tally
            .entry(key)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Occurrences recorded so far for `method` and `path`.
    pub fn get(&self, method: &str, path: &str) -> u64 {
        self.tally
            .get(&(method.to_owned(), path.to_owned()))
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All series, sorted by method then path.
    pub fn snapshot(&self) -> Vec<CounterSample> {
        let mut samples: Vec<CounterSample> = self
            .tally
            .iter()
            .map(|entry| CounterSample {
                method: entry.key().0.clone(),
                path: entry.key().1.clone(),
                count: entry.value().load(Ordering::Relaxed),
            })
            .collect();
        samples.sort_by(|a, b| (&a.method, &a.path).cmp(&(&b.method, &b.path)));
        samples
    }
}

impl std::fmt::Debug for RequestCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCounter")
            .field("name", &self.name)
            .field("series", &self.tally.len())
            .finish()
    }
}

/// The counters shared by the HTTP surface, created once per process.
#[derive(Debug, Clone)]
pub struct HttpInstruments {
    pub ok_responses: RequestCounter,
    pub panic_responses: RequestCounter,
}

impl HttpInstruments {
    pub fn new(meter: &Meter) -> Self {
        Self {
            ok_responses: RequestCounter::new(
                meter,
                OK_RESPONSES,
                "Counts the number of OK responses",
            ),
            panic_responses: RequestCounter::new(
                meter,
                PANIC_RESPONSES,
                "Counts the number of panic responses",
            ),
        }
    }
}
