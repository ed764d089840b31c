//! Field population statistics
//!
//! Counting types produced by the standard plugins and combined by the merge
//! service. Every counter keeps `populated_count <= total_count`, and every
//! `frequency` is derived from the counters, never set independently.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `populated / total`, or `0.0` for an empty denominator
pub fn population_rate(populated: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        populated as f64 / total as f64
    }
}

/// Sum two value histograms key by key
fn merge_histograms(
    mut primary: BTreeMap<String, usize>,
    secondary: BTreeMap<String, usize>,
) -> BTreeMap<String, usize> {
    for (value, count) in secondary {
        *primary.entry(value).or_insert(0) += count;
    }
    primary
}

/// Keep the `max` most frequent values; ties broken by value for determinism
fn truncate_histogram(histogram: &mut BTreeMap<String, usize>, max: usize) {
    if histogram.len() <= max {
        return;
    }
    let mut ranked: Vec<(String, usize)> = std::mem::take(histogram).into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max);
    histogram.extend(ranked);
}

/// Index-keyed statistics that also carry a name
trait Positioned: Sized {
    fn name(&self) -> &str;
    fn move_to(&mut self, index: usize);
    fn combine(self, other: Self) -> Self;
}

/// Names agree when equal or when either side has none
fn same_name(a: &str, b: &str) -> bool {
    a.is_empty() || b.is_empty() || a == b
}

/// Merge index-keyed statistics. Entries pair by index while their names
/// agree and by name otherwise, so two corpora that numbered the same
/// named position differently still combine the right counts. A named
/// entry with no partner that collides with an occupied index is appended
/// after the last one.
fn merge_positioned<T: Positioned>(
    mut primary: BTreeMap<usize, T>,
    secondary: BTreeMap<usize, T>,
) -> BTreeMap<usize, T> {
    for (index, mut item) in secondary {
        let slot = match primary.get(&index) {
            Some(existing) if same_name(existing.name(), item.name()) => Some(index),
            _ if item.name().is_empty() => None,
            _ => primary
                .iter()
                .find(|(_, existing)| existing.name() == item.name())
                .map(|(slot, _)| *slot),
        };
        match slot.and_then(|slot| primary.remove(&slot).map(|existing| (slot, existing))) {
            Some((slot, existing)) => {
                primary.insert(slot, existing.combine(item));
            }
            None if !primary.contains_key(&index) => {
                primary.insert(index, item);
            }
            None => {
                let next = primary.keys().next_back().map_or(index, |last| last + 1);
                item.move_to(next);
                primary.insert(next, item);
            }
        }
    }
    primary
}

/// Population statistics for one component of a composite field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPattern {
    pub component_index: usize,
    pub component_name: String,
    pub populated_count: usize,
    pub total_count: usize,
    pub frequency: f64,
    #[serde(default)]
    pub common_values: BTreeMap<String, usize>,
}

impl ComponentPattern {
    pub fn new(component_index: usize, component_name: impl Into<String>) -> Self {
        Self {
            component_index,
            component_name: component_name.into(),
            ..Default::default()
        }
    }

    /// Count one occurrence of this component position
    pub fn record(&mut self, value: &str) {
        self.total_count += 1;
        if !value.is_empty() {
            self.populated_count += 1;
            *self.common_values.entry(value.to_string()).or_insert(0) += 1;
        }
        self.frequency = population_rate(self.populated_count, self.total_count);
    }

    pub fn truncate_common_values(&mut self, max: usize) {
        truncate_histogram(&mut self.common_values, max);
    }

    /// Pointwise sum of two component statistics
    pub fn merge_with(self, other: ComponentPattern) -> ComponentPattern {
        let populated_count = self.populated_count + other.populated_count;
        let total_count = self.total_count + other.total_count;
        ComponentPattern {
            component_index: self.component_index,
            component_name: pick_name(self.component_name, other.component_name),
            populated_count,
            total_count,
            frequency: population_rate(populated_count, total_count),
            common_values: merge_histograms(self.common_values, other.common_values),
        }
    }
}

impl Positioned for ComponentPattern {
    fn name(&self) -> &str {
        &self.component_name
    }

    fn move_to(&mut self, index: usize) {
        self.component_index = index;
    }

    fn combine(self, other: Self) -> Self {
        self.merge_with(other)
    }
}

/// Population statistics for one field position
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFrequency {
    pub field_index: usize,
    pub field_name: String,
    pub populated_count: usize,
    pub total_count: usize,
    pub frequency: f64,
    #[serde(default)]
    pub common_values: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub component_patterns: BTreeMap<usize, ComponentPattern>,
}

impl FieldFrequency {
    pub fn new(field_index: usize, field_name: impl Into<String>) -> Self {
        Self {
            field_index,
            field_name: field_name.into(),
            ..Default::default()
        }
    }

    /// Build from raw counters; `populated` is capped at `total`
    pub fn from_counts(
        field_index: usize,
        field_name: impl Into<String>,
        populated: usize,
        total: usize,
    ) -> Self {
        let populated_count = populated.min(total);
        Self {
            field_index,
            field_name: field_name.into(),
            populated_count,
            total_count: total,
            frequency: population_rate(populated_count, total),
            ..Default::default()
        }
    }

    /// Count one occurrence of this field position
    pub fn record(&mut self, value: &str) {
        self.total_count += 1;
        if !value.is_empty() {
            self.populated_count += 1;
            *self.common_values.entry(value.to_string()).or_insert(0) += 1;
        }
        self.frequency = population_rate(self.populated_count, self.total_count);
    }

    /// Count one occurrence of a component inside this field
    pub fn record_component(&mut self, component_index: usize, name: &str, value: &str) {
        self.component_patterns
            .entry(component_index)
            .or_insert_with(|| ComponentPattern::new(component_index, name))
            .record(value);
    }

    /// Bound the value histograms of this field and its components
    pub fn truncate_common_values(&mut self, max: usize) {
        truncate_histogram(&mut self.common_values, max);
        for component in self.component_patterns.values_mut() {
            component.truncate_common_values(max);
        }
    }

    /// Most frequent value, if any was observed
    pub fn most_common_value(&self) -> Option<(&str, usize)> {
        self.common_values
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(value, count)| (value.as_str(), *count))
    }

    /// Pointwise sum of two field statistics; components pair by name when
    /// their indices disagree
    pub fn merge_with(self, other: FieldFrequency) -> FieldFrequency {
        let populated_count = self.populated_count + other.populated_count;
        let total_count = self.total_count + other.total_count;
        let component_patterns =
            merge_positioned(self.component_patterns, other.component_patterns);

        FieldFrequency {
            field_index: self.field_index,
            field_name: pick_name(self.field_name, other.field_name),
            populated_count,
            total_count,
            frequency: population_rate(populated_count, total_count),
            common_values: merge_histograms(self.common_values, other.common_values),
            component_patterns,
        }
    }
}

impl Positioned for FieldFrequency {
    fn name(&self) -> &str {
        &self.field_name
    }

    fn move_to(&mut self, index: usize) {
        self.field_index = index;
    }

    fn combine(self, other: Self) -> Self {
        self.merge_with(other)
    }
}

/// Prefer a non-empty name, then the lexically smaller one, so that merging
/// is symmetric
fn pick_name(a: String, b: String) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b,
        (_, true) => a,
        _ => a.min(b),
    }
}

/// Field statistics for one segment (or record / resource) type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPattern {
    pub segment_id: String,
    pub field_frequencies: BTreeMap<usize, FieldFrequency>,
    /// Number of segment instances counted
    pub sample_size: usize,
}

impl SegmentPattern {
    pub fn new(segment_id: impl Into<String>) -> Self {
        Self {
            segment_id: segment_id.into(),
            ..Default::default()
        }
    }

    pub fn field(&self, index: usize) -> Option<&FieldFrequency> {
        self.field_frequencies.get(&index)
    }

    /// Field statistics for `index`, created on first use
    pub fn field_mut(&mut self, index: usize, name: &str) -> &mut FieldFrequency {
        self.field_frequencies
            .entry(index)
            .or_insert_with(|| FieldFrequency::new(index, name))
    }

    /// Mean population rate over all fields of this segment
    pub fn mean_frequency(&self) -> f64 {
        if self.field_frequencies.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.field_frequencies.values().map(|f| f.frequency).sum();
        sum / self.field_frequencies.len() as f64
    }

    pub fn merge_with(self, other: SegmentPattern) -> SegmentPattern {
        SegmentPattern {
            segment_id: self.segment_id,
            field_frequencies: merge_positioned(self.field_frequencies, other.field_frequencies),
            sample_size: self.sample_size + other.sample_size,
        }
    }
}

/// Per-segment field statistics for one `(standard, message type)` corpus
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatterns {
    pub standard: String,
    pub message_type: String,
    pub segment_patterns: BTreeMap<String, SegmentPattern>,
    /// Number of messages the statistics were computed from
    #[serde(default)]
    pub sample_size: usize,
}

impl FieldPatterns {
    pub fn new(standard: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            standard: standard.into(),
            message_type: message_type.into(),
            ..Default::default()
        }
    }

    pub fn segment(&self, segment_id: &str) -> Option<&SegmentPattern> {
        self.segment_patterns.get(segment_id)
    }

    /// Segment statistics for `segment_id`, created on first use
    pub fn segment_mut(&mut self, segment_id: &str) -> &mut SegmentPattern {
        self.segment_patterns
            .entry(segment_id.to_string())
            .or_insert_with(|| SegmentPattern::new(segment_id))
    }

    /// Field statistics by `"SEG.n"` path
    pub fn field(&self, path: &str) -> Option<&FieldFrequency> {
        let (segment, index) = path.split_once('.')?;
        let index: usize = index.parse().ok()?;
        self.segment(segment)?.field(index)
    }

    /// Iterate over every field with its `"SEG.n"` path
    pub fn fields(&self) -> impl Iterator<Item = (String, &FieldFrequency)> {
        self.segment_patterns.iter().flat_map(|(segment_id, segment)| {
            segment
                .field_frequencies
                .iter()
                .map(move |(index, field)| (format!("{segment_id}.{index}"), field))
        })
    }

    pub fn field_count(&self) -> usize {
        self.segment_patterns
            .values()
            .map(|s| s.field_frequencies.len())
            .sum()
    }

    /// Bound every value histogram
    pub fn truncate_common_values(&mut self, max: usize) {
        for segment in self.segment_patterns.values_mut() {
            for field in segment.field_frequencies.values_mut() {
                field.truncate_common_values(max);
            }
        }
    }

    /// Union of segments with pointwise field sums. Callers are responsible
    /// for checking that standard and message type agree.
    pub fn merge_with(self, other: FieldPatterns) -> FieldPatterns {
        let mut segments = self.segment_patterns;
        for (segment_id, segment) in other.segment_patterns {
            let merged = match segments.remove(&segment_id) {
                Some(existing) => existing.merge_with(segment),
                None => segment,
            };
            segments.insert(segment_id, merged);
        }
        FieldPatterns {
            standard: self.standard,
            message_type: self.message_type,
            segment_patterns: segments,
            sample_size: self.sample_size + other.sample_size,
        }
    }
}

/// Corpus-level rollup with flattened field paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePattern {
    pub standard: String,
    pub message_type: String,
    /// Messages that contributed statistics
    pub sample_size: usize,
    /// Messages offered for analysis, including any that were skipped
    pub total_samples: usize,
    /// `"SEG.n"` → statistics
    pub field_frequencies: BTreeMap<String, FieldFrequency>,
    /// `"SEG.n.c"` → statistics
    pub component_patterns: BTreeMap<String, ComponentPattern>,
    /// Average null rate over all fields
    pub null_tolerance: f64,
    pub confidence: f64,
    pub analysis_date: DateTime<Utc>,
    pub segment_patterns: BTreeMap<String, SegmentPattern>,
}

impl MessagePattern {
    /// Flatten `FieldPatterns` into a rollup
    pub fn from_field_patterns(
        patterns: &FieldPatterns,
        total_samples: usize,
        confidence: f64,
    ) -> Self {
        let mut field_frequencies = BTreeMap::new();
        let mut component_patterns = BTreeMap::new();

        for (path, field) in patterns.fields() {
            for (index, component) in &field.component_patterns {
                component_patterns.insert(format!("{path}.{index}"), component.clone());
            }
            field_frequencies.insert(path, field.clone());
        }

        let null_tolerance = null_tolerance(field_frequencies.values());

        Self {
            standard: patterns.standard.clone(),
            message_type: patterns.message_type.clone(),
            sample_size: patterns.sample_size,
            total_samples: total_samples.max(patterns.sample_size),
            field_frequencies,
            component_patterns,
            null_tolerance,
            confidence: confidence.clamp(0.0, 1.0),
            analysis_date: Utc::now(),
            segment_patterns: patterns.segment_patterns.clone(),
        }
    }
}

/// Mean of `1 - frequency` across fields, `0.0` when there are none
pub fn null_tolerance<'a>(fields: impl Iterator<Item = &'a FieldFrequency>) -> f64 {
    let (sum, count) = fields.fold((0.0, 0usize), |(sum, count), field| {
        (sum + (1.0 - field.frequency), count + 1)
    });
    if count == 0 { 0.0 } else { sum / count as f64 }
}
