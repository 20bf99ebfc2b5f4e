//! Entities detected by the recognition service.

use serde::{Deserialize, Serialize};

/// One entity detected in a piece of text.
///
/// Field names follow the service's output records so batch output lines
/// deserialize directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "Type")]
    pub label_type: String,
    /// Confidence in 0.0..=1.0.
    #[serde(rename = "Score")]
    pub confidence_score: f64,
    #[serde(rename = "BeginOffset")]
    pub begin_offset: u64,
    #[serde(rename = "EndOffset")]
    pub end_offset: u64,
}

impl DetectedEntity {
    /// Whether the record satisfies the output schema beyond its types.
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence_score) && self.begin_offset < self.end_offset
    }
}

/// Entities for one input document (one output line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntities {
    /// Input file the document came from.
    #[serde(rename = "File", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Zero-based line within `file` for one-document-per-line input.
    #[serde(rename = "Line", default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(rename = "Entities", alias = "output")]
    pub entities: Vec<DetectedEntity>,
}

/// All documents read from a batch output object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionReport {
    pub documents: Vec<DocumentEntities>,
    /// Lines that did not match the output schema and were skipped.
    pub unparsable_lines: usize,
}

impl DetectionReport {
    pub fn entity_count(&self) -> usize {
        self.documents.iter().map(|d| d.entities.len()).sum()
    }
}
