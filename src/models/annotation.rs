//! Annotation records and the label set derived from them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest entity type name the recognition service accepts.
pub const MAX_LABEL_LEN: usize = 64;

/// Characters the service reserves inside entity type names.
const RESERVED_LABEL_CHARS: [char; 4] = ['\n', '\r', '\t', ','];

/// One tagged span from an annotation table.
///
/// Offsets are character positions within line `line_number` of the
/// referenced document; `begin_offset < end_offset` always holds for records
/// produced by the annotation loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    #[serde(rename = "File")]
    pub document_id: String,
    #[serde(rename = "Line")]
    pub line_number: u64,
    #[serde(rename = "Begin Offset")]
    pub begin_offset: u64,
    #[serde(rename = "End Offset")]
    pub end_offset: u64,
    #[serde(rename = "Type")]
    pub label_type: String,
}

impl AnnotationRecord {
    /// Number of characters covered by the span.
    pub fn span_len(&self) -> u64 {
        self.end_offset.saturating_sub(self.begin_offset)
    }
}

/// Distinct entity labels in first-seen order.
///
/// Always non-empty; every label satisfies the service naming rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    /// Build a label set, dropping repeats and keeping first-seen order.
    pub fn from_labels<I, S>(labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for label in labels {
            let label = label.into();
            validate_label(&label)?;
            if seen.insert(label.clone()) {
                ordered.push(label);
            }
        }

        if ordered.is_empty() {
            return Err(ValidationError::EmptyLabelSet);
        }
        Ok(Self(ordered))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = ValidationError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_labels(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(set: LabelSet) -> Self {
        set.0
    }
}

/// Check a single label against the service's entity type naming rules.
fn validate_label(label: &str) -> Result<(), ValidationError> {
    let reason = if label.trim().is_empty() {
        Some("label must not be empty")
    } else if label.chars().count() > MAX_LABEL_LEN {
        Some("label must be at most 64 characters")
    } else if label.contains(RESERVED_LABEL_CHARS) {
        Some("label must not contain newlines, tabs or commas")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
