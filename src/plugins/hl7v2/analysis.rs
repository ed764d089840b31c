//! Field counting and deviation scans over parsed messages

use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::warn;

use super::message::{LineTerminator, ParsedMessage, STANDARD_ENCODING, STANDARD_FIELD_SEPARATOR};
use super::structure::{
    REQUIRED_FIELDS, TIMESTAMP, TIMESTAMP_FIELDS, component_name, expected_segments, field_name,
    is_custom_segment, timestamp_precision,
};
use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{DeviationType, FieldPatterns, FormatDeviation, Severity};

/// Parse a corpus, dropping messages that fail to parse
pub fn parse_corpus(messages: &[String]) -> Vec<ParsedMessage> {
    let parse = |(index, raw): (usize, &String)| match ParsedMessage::parse(raw) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(message = index, error = %e, "Skipping unparseable message");
            None
        }
    };

    #[cfg(feature = "parallel")]
    let parsed = messages.par_iter().enumerate().filter_map(parse).collect();
    #[cfg(not(feature = "parallel"))]
    let parsed = messages.iter().enumerate().filter_map(parse).collect();

    parsed
}

/// Whether components of this field are worth counting. MSH-1 and MSH-2 hold
/// the delimiters themselves.
fn has_components(segment_id: &str, index: usize) -> bool {
    !(segment_id == "MSH" && index <= 2)
}

/// Count populated vs. total occurrences for every field position.
///
/// A first pass fixes the widest field list per segment type and the widest
/// component list per field, so every instance counts toward the same
/// denominators. Absent trailing fields count as empty.
pub fn count_fields(
    parsed: &[ParsedMessage],
    standard: &str,
    message_type: &str,
    options: &InferenceOptions,
    cancel: &CancellationToken,
) -> IntelligenceResult<FieldPatterns> {
    let mut widths: BTreeMap<&str, usize> = BTreeMap::new();
    let mut component_widths: HashMap<(&str, usize), usize> = HashMap::new();

    for message in parsed {
        for segment in &message.segments {
            let width = widths.entry(segment.id.as_str()).or_insert(0);
            *width = (*width).max(segment.field_count());

            if !options.include_component_patterns {
                continue;
            }
            for index in 1..=segment.field_count() {
                let Some(value) = segment.field(index) else {
                    continue;
                };
                if !has_components(&segment.id, index) {
                    continue;
                }
                let widest = message
                    .repetitions(value)
                    .map(|rep| message.components(rep).count())
                    .max()
                    .unwrap_or(0);
                let entry = component_widths
                    .entry((segment.id.as_str(), index))
                    .or_insert(0);
                *entry = (*entry).max(widest);
            }
        }
    }

    let mut patterns = FieldPatterns::new(standard, message_type);
    patterns.sample_size = parsed.len();

    for message in parsed {
        cancel.check()?;
        for segment in &message.segments {
            let width = widths.get(segment.id.as_str()).copied().unwrap_or(0);
            let pattern = patterns.segment_mut(&segment.id);
            pattern.sample_size += 1;

            for index in 1..=width {
                let value = segment.field(index).unwrap_or("");
                let field = pattern.field_mut(index, &field_name(&segment.id, index));
                field.record(value);

                let components = component_widths
                    .get(&(segment.id.as_str(), index))
                    .copied()
                    .unwrap_or(0);
                if components < 2 {
                    continue;
                }
                for repetition in message.repetitions(value) {
                    let mut parts = message.components(repetition);
                    for component in 1..=components {
                        let part = parts.next().unwrap_or("");
                        field.record_component(
                            component,
                            &component_name(&segment.id, index, component),
                            part,
                        );
                    }
                }
            }
        }
    }

    Ok(patterns)
}

fn rate(count: usize, total: usize) -> f64 {
    crate::models::population_rate(count, total)
}

/// Non-standard delimiters and line terminators
pub fn encoding_deviations(parsed: &[ParsedMessage]) -> Vec<FormatDeviation> {
    let total = parsed.len();
    let mut encodings: BTreeMap<&str, usize> = BTreeMap::new();
    let mut separators: BTreeMap<char, usize> = BTreeMap::new();
    let mut line_feeds = 0;

    for message in parsed {
        if message.encoding != STANDARD_ENCODING {
            *encodings.entry(message.encoding.as_str()).or_insert(0) += 1;
        }
        if message.delimiters.field != STANDARD_FIELD_SEPARATOR {
            *separators.entry(message.delimiters.field).or_insert(0) += 1;
        }
        if message.terminator != LineTerminator::CarriageReturn {
            line_feeds += 1;
        }
    }

    let mut deviations = Vec::new();
    let encoding_count: usize = encodings.values().sum();
    if encoding_count > 0 {
        let observed: Vec<&str> = encodings.keys().copied().collect();
        deviations.push(FormatDeviation::new(
            DeviationType::EncodingVariation,
            "MSH.2",
            format!(
                "Non-standard encoding characters {observed:?} (expected {STANDARD_ENCODING:?})"
            ),
            Severity::Warning,
            rate(encoding_count, total),
        ));
    }
    let separator_count: usize = separators.values().sum();
    if separator_count > 0 {
        let observed: Vec<char> = separators.keys().copied().collect();
        deviations.push(FormatDeviation::new(
            DeviationType::EncodingVariation,
            "MSH.1",
            format!("Non-standard field separator {observed:?}"),
            Severity::Error,
            rate(separator_count, total),
        ));
    }
    if line_feeds > 0 {
        deviations.push(FormatDeviation::new(
            DeviationType::EncodingVariation,
            "SegmentTerminator",
            "Segments terminated by line feeds instead of carriage returns",
            Severity::Info,
            rate(line_feeds, total),
        ));
    }
    deviations
}

/// Unexpected, custom and missing segments relative to the message structure.
///
/// With no `message_type`, each message is checked against its own MSH-9.
/// Types missing from the structure table are checked against their event
/// family.
pub fn structural_deviations(
    parsed: &[ParsedMessage],
    message_type: Option<&str>,
) -> Vec<FormatDeviation> {
    let total = parsed.len();
    // (segment, kind) -> messages exhibiting it
    let mut unexpected: BTreeMap<String, usize> = BTreeMap::new();
    let mut custom: BTreeMap<String, usize> = BTreeMap::new();
    let mut missing: BTreeMap<String, usize> = BTreeMap::new();

    for message in parsed {
        let own_type = message.message_type();
        let expected = message_type
            .or(own_type.as_deref())
            .map(expected_segments);

        let mut seen: Vec<&str> = message.segments.iter().map(|s| s.id.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();

        for id in &seen {
            if is_custom_segment(id) {
                *custom.entry(id.to_string()).or_insert(0) += 1;
            } else if let Some(expected) = &expected
                && !expected.allows(id)
            {
                *unexpected.entry(id.to_string()).or_insert(0) += 1;
            }
        }
        if let Some(expected) = &expected {
            for required in &expected.required {
                if !seen.contains(required) {
                    *missing.entry(required.to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    let mut deviations = Vec::new();
    for (id, count) in custom {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            id.clone(),
            format!("Custom segment {id}"),
            Severity::Info,
            rate(count, total),
        ));
    }
    for (id, count) in unexpected {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            id.clone(),
            format!("Segment {id} not expected in this message structure"),
            Severity::Warning,
            rate(count, total),
        ));
    }
    for (id, count) in missing {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            id.clone(),
            format!("Required segment {id} missing"),
            Severity::Error,
            rate(count, total),
        ));
    }
    deviations
}

/// Timestamp format and required-field checks for one segment type
pub fn field_format_deviations(parsed: &[ParsedMessage], segment_type: &str) -> Vec<FormatDeviation> {
    let instances: Vec<_> = parsed
        .iter()
        .flat_map(|m| m.segments_named(segment_type))
        .collect();
    let total = instances.len();
    if total == 0 {
        return Vec::new();
    }

    let mut deviations = Vec::new();

    for (segment_id, index, expects_time) in TIMESTAMP_FIELDS {
        if *segment_id != segment_type {
            continue;
        }
        let location = format!("{segment_type}.{index}");
        let values: Vec<&str> = instances
            .iter()
            .filter_map(|s| s.field(*index))
            .map(|v| v.split(['^', '~']).next().unwrap_or(v))
            .filter(|v| !v.is_empty())
            .collect();

        let malformed = values.iter().filter(|v| !TIMESTAMP.is_match(v)).count();
        if malformed > 0 {
            deviations.push(FormatDeviation::new(
                DeviationType::FieldFormatDeviation,
                location.clone(),
                format!("{malformed} values do not match YYYYMMDD[HHMM[SS]] timestamp format"),
                Severity::Warning,
                rate(malformed, values.len()),
            ));
        }

        if *expects_time {
            let date_only = values
                .iter()
                .filter(|v| TIMESTAMP.is_match(v) && timestamp_precision(v) <= 8)
                .count();
            if date_only > 0 {
                deviations.push(FormatDeviation::new(
                    DeviationType::DataFormatVariation,
                    location,
                    "Timestamp sent without time component",
                    Severity::Info,
                    rate(date_only, values.len()),
                ));
            }
        }
    }

    for (segment_id, index) in REQUIRED_FIELDS {
        if *segment_id != segment_type {
            continue;
        }
        let empty = instances
            .iter()
            .filter(|s| s.field(*index).is_none_or(str::is_empty))
            .count();
        if empty > 0 {
            deviations.push(FormatDeviation::new(
                DeviationType::MissingRequiredField,
                format!("{segment_type}.{index}"),
                format!("{} is required but empty", field_name(segment_type, *index)),
                Severity::Error,
                rate(empty, total),
            ));
        }
    }

    deviations
}

/// Union of every scan, de-duplicated by `(type, location)`
pub fn all_deviations(
    parsed: &[ParsedMessage],
    message_type: Option<&str>,
    cancel: &CancellationToken,
) -> IntelligenceResult<Vec<FormatDeviation>> {
    let mut deviations = encoding_deviations(parsed);
    deviations.extend(structural_deviations(parsed, message_type));

    let mut segment_types: Vec<&str> = parsed
        .iter()
        .flat_map(|m| m.segments.iter().map(|s| s.id.as_str()))
        .collect();
    segment_types.sort_unstable();
    segment_types.dedup();

    for segment_type in segment_types {
        cancel.check()?;
        for deviation in field_format_deviations(parsed, segment_type) {
            if !deviations.iter().any(|d| d.key() == deviation.key()) {
                deviations.push(deviation);
            }
        }
    }
    Ok(deviations)
}

/// Parse a corpus for a deviation scan, failing if nothing parses
pub fn require_parsed(messages: &[String]) -> IntelligenceResult<Vec<ParsedMessage>> {
    if messages.is_empty() {
        return Err(IntelligenceError::validation("No messages provided"));
    }
    let parsed = parse_corpus(messages);
    if parsed.is_empty() {
        return Err(IntelligenceError::analysis(
            "parsing",
            format!("none of {} messages could be parsed", messages.len()),
        ));
    }
    Ok(parsed)
}
