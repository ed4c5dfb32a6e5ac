//! The Observation pipeline (spec.md §4.4): acceptance filter, JSON
//! extraction, circular sample buffer, transform, and aggregate queries.

use std::collections::VecDeque;

use hub_core::{DataSample, DataType};
use tracing::warn;

/// A duration older than this is treated as an absolute epoch timestamp
/// rather than "seconds before now" (spec.md §4.4 "Aggregate queries").
pub const THIRTY_YEARS_SECS: f64 = 946_684_800.0;

/// Aggregate function applied over the buffer to produce the observation's
/// *reported* current value (spec.md §4.4 "Transform").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    None,
    Mean,
    StdDev,
    Max,
    Min,
}

/// Why an incoming sample did not update the observation. Deliberately not
/// a `HubError` variant (spec.md §7: "Filter rejections are not errors").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `jsonExtraction` is set but the incoming sample isn't JSON, or the
    /// extraction path didn't resolve.
    ExtractionFailed,
    /// Outside `[lowLimit, highLimit]`, or inside the deadband when
    /// `lowLimit > highLimit`.
    Range,
    /// The resource is overridden; nothing but clearing the override can
    /// change its value.
    Overridden,
    /// `changeBy` is set and the new value didn't move far enough from the
    /// previous accepted sample.
    NoChange,
    /// `minPeriod` seconds have not yet elapsed since the last accepted push.
    TooSoon,
}

/// Observation-specific admin settings and runtime state (spec.md §3
/// "Observation-specific state").
pub struct ObsState {
    pub high_limit: Option<f64>,
    pub low_limit: Option<f64>,
    pub change_by: Option<f64>,
    pub min_period: f64,
    pub transform: Transform,
    pub max_count: usize,
    pub backup_period: f64,
    pub json_extraction: Option<String>,

    buffer: VecDeque<DataSample>,
    buffered_type: Option<DataType>,
    last_push_time_ms: Option<u64>,
    pub(crate) last_backup_time_s: f64,
    pub(crate) backup_timer_pending: bool,
}

impl Default for ObsState {
    fn default() -> Self {
        Self {
            high_limit: None,
            low_limit: None,
            change_by: None,
            min_period: 0.0,
            transform: Transform::default(),
            max_count: 0,
            backup_period: 0.0,
            json_extraction: None,
            buffer: VecDeque::new(),
            buffered_type: None,
            last_push_time_ms: None,
            // No backup has ever been written, so the first eligible push
            // must be treated as immediately due regardless of how close to
            // its own monotonic origin the clock still is (spec.md §4.5
            // "Write cadence": a freshly created observation has no prior
            // write to measure `backupPeriod` against).
            last_backup_time_s: f64::NEG_INFINITY,
            backup_timer_pending: false,
        }
    }
}

impl ObsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered_type(&self) -> Option<DataType> {
        self.buffered_type
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_iter(&self) -> impl Iterator<Item = &DataSample> {
        self.buffer.iter()
    }

    /// Apply `jsonExtraction` (if configured) to an incoming sample,
    /// producing the (possibly re-typed) sample the rest of the pipeline
    /// operates on (spec.md §4.4 "JSON extraction").
    fn extract(&self, data_type: DataType, sample: &DataSample) -> Result<DataSample, ()> {
        match &self.json_extraction {
            None => Ok(sample.clone()),
            Some(path) => {
                if data_type != DataType::Json {
                    return Err(());
                }
                sample.extract(path).map_err(|_| ())
            }
        }
    }

    /// Spec.md §4.4 "Range": NaN limits are "unset"; `low > high` means a
    /// deadband (reject values strictly between them) rather than a normal
    /// inclusive range.
    fn range_check(&self, value: f64) -> bool {
        let low = self.low_limit.filter(|l| !l.is_nan());
        let high = self.high_limit.filter(|h| !h.is_nan());
        match (low, high) {
            (Some(l), Some(h)) if l > h => !(l > value && value > h),
            (Some(l), Some(h)) => value >= l && value <= h,
            (Some(l), None) => value >= l,
            (None, Some(h)) => value <= h,
            (None, None) => true,
        }
    }

    fn change_by_check(&self, data_type: DataType, sample: &DataSample) -> bool {
        let Some(cb) = self.change_by.filter(|c| !c.is_nan() && *c != 0.0) else {
            return true;
        };
        let Some(prev) = self.buffer.back() else {
            return true;
        };
        if self.buffered_type != Some(data_type) {
            return true;
        }
        match data_type {
            DataType::Numeric => {
                let (Some(p), Some(v)) = (prev.as_numeric(), sample.as_numeric()) else {
                    return true;
                };
                (v - p).abs() >= cb
            }
            DataType::Boolean => prev.as_bool() != sample.as_bool(),
            DataType::String => prev.as_str() != sample.as_str(),
            DataType::Json => prev.as_json_text() != sample.as_json_text(),
            DataType::Trigger => true,
        }
    }

    /// Run the full acceptance filter (spec.md §4.4) and, on success,
    /// append to the buffer and update filter bookkeeping. Returns the
    /// (possibly extraction-retyped) sample and its type so the caller can
    /// set it as the resource's current/pushed value.
    pub fn accept(
        &mut self,
        data_type: DataType,
        sample: DataSample,
        is_overridden: bool,
        now_ms: u64,
    ) -> Result<(DataType, DataSample), RejectReason> {
        let (data_type, sample) = match self.extract(data_type, &sample) {
            Ok(s) => (s.data_type(), s),
            Err(()) => return Err(RejectReason::ExtractionFailed),
        };

        if data_type == DataType::Numeric {
            let v = sample.as_numeric().expect("numeric sample carries a numeric value");
            if !self.range_check(v) {
                return Err(RejectReason::Range);
            }
        }

        if is_overridden {
            return Err(RejectReason::Overridden);
        }

        if !self.change_by_check(data_type, &sample) {
            return Err(RejectReason::NoChange);
        }

        if let Some(last) = self.last_push_time_ms {
            let min_period_ms = (self.min_period.max(0.0) * 1000.0) as u64;
            if now_ms.saturating_sub(last) < min_period_ms {
                return Err(RejectReason::TooSoon);
            }
        }

        self.last_push_time_ms = Some(now_ms);
        self.append_to_buffer(data_type, sample.clone());
        Ok((data_type, sample))
    }

    fn append_to_buffer(&mut self, data_type: DataType, sample: DataSample) {
        if self.max_count == 0 {
            return;
        }
        if self.buffered_type != Some(data_type) {
            self.buffer.clear();
            self.buffered_type = Some(data_type);
        }
        if let Some(tail) = self.buffer.back() {
            if sample.timestamp() < tail.timestamp() {
                warn!(
                    ts = sample.timestamp(),
                    tail_ts = tail.timestamp(),
                    "dropping out-of-order sample: buffer timestamps must be non-decreasing"
                );
                return;
            }
        }
        self.buffer.push_back(sample);
        while self.buffer.len() > self.max_count {
            self.buffer.pop_front();
        }
    }

    /// Load a restored buffer directly (spec.md §4.5 "Restore"), bypassing
    /// the acceptance filter — the samples already passed it once, on the
    /// run that originally wrote the backup.
    pub fn load_restored_buffer(&mut self, data_type: DataType, samples: Vec<DataSample>) {
        self.buffered_type = Some(data_type);
        self.max_count = self.max_count.max(samples.len());
        self.buffer = samples.into_iter().collect();
    }

    /// Changing the transform clears the buffer/current value and, if
    /// `maxCount` was 0, forces it to 1 (spec.md §4.4 "Transform").
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.buffer.clear();
        self.buffered_type = None;
        if self.max_count == 0 {
            self.max_count = 1;
        }
    }

    /// Apply `maxCount`, evicting from the front if the buffer is now over
    /// capacity (spec.md §4.4 "Buffer management").
    pub fn set_max_count(&mut self, max_count: usize) {
        self.max_count = max_count;
        while self.buffer.len() > self.max_count {
            self.buffer.pop_front();
        }
    }

    /// The transformed current value to report, if `transform != None` and
    /// the buffered type is aggregable (spec.md §4.4 "Transform"). The raw
    /// incoming sample is still what's appended to the buffer; only the
    /// *reported* value differs.
    pub fn transformed_value(&self, now: f64) -> Option<DataSample> {
        if self.transform == Transform::None {
            return None;
        }
        if !matches!(self.buffered_type, Some(DataType::Numeric) | Some(DataType::Boolean)) {
            return None;
        }
        let value = match self.transform {
            Transform::None => unreachable!(),
            Transform::Mean => self.mean(),
            Transform::StdDev => self.stddev(),
            Transform::Max => self.max(),
            Transform::Min => self.min(),
        }?;
        Some(DataSample::numeric(now, value))
    }

    fn values_in_range(&self, start_time: Option<f64>) -> Vec<f64> {
        self.buffer
            .iter()
            .filter(|s| start_time.is_none_or(|t| s.timestamp() >= t))
            .filter_map(|s| s.as_aggregable())
            .collect()
    }

    /// Spec.md §4.4 "Aggregate queries" convention, shared with the
    /// streaming reader's `startAfter` parameter: below 30 years it's
    /// "seconds before now", otherwise an absolute epoch timestamp.
    pub fn resolve_start(start_time: f64, now: f64) -> f64 {
        if start_time < THIRTY_YEARS_SECS {
            now - start_time
        } else {
            start_time
        }
    }

    /// Begin a streaming read of the buffer starting strictly after
    /// `start_after` (spec.md §4.4 "Streaming JSON reader": "exact-match
    /// samples are skipped").
    pub fn start_buffer_read(&self, start_after: f64, now: f64) -> crate::reader::BufferReader {
        let threshold = Self::resolve_start(start_after, now);
        let next = self
            .buffer
            .iter()
            .find(|s| s.timestamp() > threshold)
            .cloned();
        crate::reader::BufferReader::new(next)
    }

    /// The oldest sample still held in the buffer, used by the streaming
    /// reader's eviction fallback.
    pub fn oldest(&self) -> Option<DataSample> {
        self.buffer.front().cloned()
    }

    /// The sample immediately after `after` in buffer order, identified by
    /// reference identity (not value), or `None` if `after` is no longer
    /// present.
    pub fn sample_after(&self, after: &DataSample) -> Option<DataSample> {
        let mut iter = self.buffer.iter();
        for s in iter.by_ref() {
            if DataSample::ptr_eq(s, after) {
                return iter.next().cloned();
            }
        }
        None
    }

    fn is_aggregable(&self) -> bool {
        matches!(self.buffered_type, Some(DataType::Numeric) | Some(DataType::Boolean))
    }

    pub fn query_min(&self, start_time: f64, now: f64) -> f64 {
        if !self.is_aggregable() {
            return f64::NAN;
        }
        self.min_since(Self::resolve_start(start_time, now))
            .unwrap_or(f64::NAN)
    }

    pub fn query_max(&self, start_time: f64, now: f64) -> f64 {
        if !self.is_aggregable() {
            return f64::NAN;
        }
        self.max_since(Self::resolve_start(start_time, now))
            .unwrap_or(f64::NAN)
    }

    pub fn query_mean(&self, start_time: f64, now: f64) -> f64 {
        if !self.is_aggregable() {
            return f64::NAN;
        }
        let values = self.values_in_range(Some(Self::resolve_start(start_time, now)));
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    pub fn query_stddev(&self, start_time: f64, now: f64) -> f64 {
        if !self.is_aggregable() {
            return f64::NAN;
        }
        let values = self.values_in_range(Some(Self::resolve_start(start_time, now)));
        if values.is_empty() {
            return f64::NAN;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    fn min_since(&self, start: f64) -> Option<f64> {
        self.values_in_range(Some(start))
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    fn max_since(&self, start: f64) -> Option<f64> {
        self.values_in_range(Some(start))
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    fn mean(&self) -> Option<f64> {
        let values = self.values_in_range(None);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    fn stddev(&self) -> Option<f64> {
        let values = self.values_in_range(None);
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Some(variance.sqrt())
    }

    fn max(&self) -> Option<f64> {
        self.max_since(f64::MIN)
    }

    fn min(&self) -> Option<f64> {
        self.min_since(f64::MIN)
    }
}
