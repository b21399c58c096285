use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::lock;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

/// Append-only series of `(time, value)` samples with non-decreasing time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    pub name: String,
    samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), samples: Vec::new() }
    }

    /// Appends a sample. Samples older than the last one are dropped.
    pub fn push(&mut self, time: f64, value: f64) -> bool {
        if let Some(last) = self.samples.last() {
            if time < last.time {
                return false;
            }
        }
        self.samples.push(Sample { time, value });
        true
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((self.samples.first()?.time, self.samples.last()?.time))
    }

    pub fn value_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.samples.iter().map(|sample| sample.value);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(min, max), value| (min.min(value), max.max(value))))
    }
}

/// Named series shared between the foreground context and read-only consumers.
#[derive(Clone, Debug, Default)]
pub struct TimeSeriesCollection {
    series: Arc<Mutex<BTreeMap<String, TimeSeries>>>,
}

impl TimeSeriesCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the series if it does not exist yet.
    pub fn add_series(&self, name: &str) {
        lock(&self.series).entry(name.to_string()).or_insert_with(|| TimeSeries::new(name));
    }

    pub fn record(&self, name: &str, time: f64, value: f64) -> bool {
        let mut series = lock(&self.series);
        let accepted = series.entry(name.to_string()).or_insert_with(|| TimeSeries::new(name)).push(time, value);
        if !accepted {
            log::debug!("[telemetry] '{name}' rejected out-of-order sample at t={time}");
        }
        accepted
    }

    pub fn series(&self, name: &str) -> Option<TimeSeries> {
        lock(&self.series).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.series).keys().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> bool {
        lock(&self.series).remove(name).is_some()
    }

    pub fn clear(&self) {
        lock(&self.series).clear();
    }

    pub fn snapshot(&self) -> Vec<TimeSeries> {
        lock(&self.series).values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_creates_series_and_keeps_order() {
        let telemetry = TimeSeriesCollection::new();
        assert!(telemetry.record("altitude", 0.0, 10.0));
        assert!(telemetry.record("altitude", 1.0, 30.0));
        assert!(!telemetry.record("altitude", 0.5, 20.0));
        let series = telemetry.series("altitude").expect("series exists");
        assert_eq!(series.len(), 2);
        assert_eq!(series.time_range(), Some((0.0, 1.0)));
        assert_eq!(series.value_range(), Some((10.0, 30.0)));
    }

    #[test]
    fn names_are_sorted() {
        let telemetry = TimeSeriesCollection::new();
        telemetry.add_series("speed");
        telemetry.add_series("altitude");
        assert_eq!(telemetry.names(), vec!["altitude".to_string(), "speed".to_string()]);
        assert!(telemetry.remove("speed"));
        assert_eq!(telemetry.snapshot().len(), 1);
    }
}
