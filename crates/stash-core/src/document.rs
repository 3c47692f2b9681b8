//! Document indexer: turns an `AnalysisRecord` into the flat text both indices read.
//!
//! Fields are emitted in a fixed priority order and joined with single spaces;
//! no field delimiters survive, so downstream tokenization only sees whitespace.
//! The indexing policy decides how many times each field is repeated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{AnalysisRecord, IndexedDocument, DEFAULT_CATEGORY};

/// Indexable fields in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatField {
    Summary,
    Headline,
    Category,
    Subcategories,
    ExtractedText,
    KeyInterest,
    Themes,
    Objects,
    Emotions,
    Vibes,
    LocationTags,
    Hashtags,
}

impl FlatField {
    pub const PRIORITY_ORDER: [FlatField; 12] = [
        FlatField::Summary,
        FlatField::Headline,
        FlatField::Category,
        FlatField::Subcategories,
        FlatField::ExtractedText,
        FlatField::KeyInterest,
        FlatField::Themes,
        FlatField::Objects,
        FlatField::Emotions,
        FlatField::Vibes,
        FlatField::LocationTags,
        FlatField::Hashtags,
    ];

    fn values(self, record: &AnalysisRecord) -> Vec<&str> {
        match self {
            Self::Summary => record.summary.as_deref().into_iter().collect(),
            Self::Headline => record.headline.as_deref().into_iter().collect(),
            Self::Category => record.category.as_deref().into_iter().collect(),
            Self::Subcategories => record.subcategories.iter().map(String::as_str).collect(),
            Self::ExtractedText => record.extracted_text.iter().map(String::as_str).collect(),
            Self::KeyInterest => record.key_interest.as_deref().into_iter().collect(),
            Self::Themes => record.themes.iter().map(String::as_str).collect(),
            Self::Objects => record.objects.iter().map(String::as_str).collect(),
            Self::Emotions => record.emotions.iter().map(String::as_str).collect(),
            Self::Vibes => record.vibes.iter().map(String::as_str).collect(),
            Self::LocationTags => record.location_tags.iter().map(String::as_str).collect(),
            Self::Hashtags => record.hashtags.iter().map(String::as_str).collect(),
        }
    }
}

/// How field importance is expressed in the flat text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPolicy {
    /// Every field appears once.
    #[default]
    Unweighted,
    /// High-priority fields are repeated so term frequency favours them.
    RepeatedWeighted,
}

impl IndexingPolicy {
    pub fn repeats(self, field: FlatField) -> usize {
        match self {
            Self::Unweighted => 1,
            Self::RepeatedWeighted => match field {
                FlatField::Summary | FlatField::Headline => 3,
                FlatField::Category | FlatField::Subcategories | FlatField::KeyInterest => 2,
                _ => 1,
            },
        }
    }
}

/// Build the flat searchable text for one record.
///
/// Fails with `Error::EmptyIndexableContent` when every field is blank; callers
/// skip such items instead of storing an empty document.
pub fn build_flat_document(record: &AnalysisRecord, policy: IndexingPolicy) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    for field in FlatField::PRIORITY_ORDER {
        let joined = field
            .values(record)
            .into_iter()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            continue;
        }
        for _ in 0..policy.repeats(field) {
            parts.push(joined.clone());
        }
    }
    if parts.is_empty() {
        return Err(Error::EmptyIndexableContent(record.item_id.clone()));
    }
    Ok(parts.join(" "))
}

/// Resolve a record into the document both indices store.
pub fn to_indexed_document(record: &AnalysisRecord, policy: IndexingPolicy) -> Result<IndexedDocument> {
    let flat_text = build_flat_document(record, policy)?;
    let category = record
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string();
    let tenant_id = record
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Ok(IndexedDocument { item_id: record.item_id.clone(), tenant_id, category, flat_text, version: record.version })
}

/// Parse one raw record, enforcing the fields the engine cannot do without.
pub fn parse_record(value: serde_json::Value) -> Result<AnalysisRecord> {
    let record: AnalysisRecord = serde_json::from_value(value).map_err(|e| Error::MalformedRecord(e.to_string()))?;
    if record.item_id.trim().is_empty() {
        return Err(Error::MalformedRecord("missing item_id".into()));
    }
    Ok(record)
}

/// Parse a batch of raw records, logging and skipping the malformed ones.
///
/// Returns the parsed records and the number skipped.
pub fn parse_records<I>(values: I) -> (Vec<AnalysisRecord>, usize)
where
    I: IntoIterator<Item = serde_json::Value>,
{
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (i, value) in values.into_iter().enumerate() {
        match parse_record(value) {
            Ok(r) => records.push(r),
            Err(e) => {
                warn!(position = i, error = %e, "skipping malformed analysis record");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

/// Keep only the highest version per item, in first-appearance order.
///
/// Returns the surviving records and how many older versions were dropped.
/// On equal versions the later record wins, matching re-delivery semantics.
pub fn latest_versions(records: Vec<AnalysisRecord>) -> (Vec<AnalysisRecord>, usize) {
    let mut slot_by_id: HashMap<String, usize> = HashMap::new();
    let mut latest: Vec<AnalysisRecord> = Vec::with_capacity(records.len());
    let mut superseded = 0usize;
    for record in records {
        match slot_by_id.get(&record.item_id) {
            Some(&slot) => {
                superseded += 1;
                if record.version >= latest[slot].version {
                    latest[slot] = record;
                }
            }
            None => {
                slot_by_id.insert(record.item_id.clone(), latest.len());
                latest.push(record);
            }
        }
    }
    (latest, superseded)
}
