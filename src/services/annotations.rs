//! Annotation table loading and validation.
//!
//! Reads the `File, Line, Begin Offset, End Offset, Type` table that tags
//! entity spans in the training documents, derives the label set, and checks
//! every span against the documents that will be uploaded with it.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::models::{AnnotationRecord, LabelSet};

/// Column names in the order the service documents them.
pub const COLUMNS: [&str; 5] = ["File", "Line", "Begin Offset", "End Offset", "Type"];

/// A parsed, row-validated annotation table.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationTable {
    records: Vec<AnnotationRecord>,
    /// Source row (1-based, data rows only) of each record.
    rows: Vec<usize>,
}

/// Positions of the required columns within the header.
struct ColumnIndex {
    file: usize,
    line: usize,
    begin: usize,
    end: usize,
    label: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ValidationError> {
        let names: Vec<&str> = headers.iter().map(str::trim).collect();
        if let Some(extra) = names.iter().find(|n| !COLUMNS.contains(n)) {
            return Err(ValidationError::InvalidInput(format!(
                "Annotation table has unexpected column '{}'",
                extra
            )));
        }

        let position = |column: &str| {
            names
                .iter()
                .position(|n| *n == column)
                .ok_or_else(|| ValidationError::MissingColumn(column.to_string()))
        };

        Ok(Self {
            file: position(COLUMNS[0])?,
            line: position(COLUMNS[1])?,
            begin: position(COLUMNS[2])?,
            end: position(COLUMNS[3])?,
            label: position(COLUMNS[4])?,
        })
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    row: usize,
    name: &'static str,
) -> Result<&'r str, ValidationError> {
    match record.get(index).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ValidationError::MissingField { row, field: name }),
    }
}

fn number(
    record: &csv::StringRecord,
    index: usize,
    row: usize,
    name: &'static str,
) -> Result<u64, ValidationError> {
    let value = field(record, index, row, name)?;
    value.parse().map_err(|_| ValidationError::InvalidNumber {
        row,
        field: name,
        value: value.to_string(),
    })
}

impl AnnotationTable {
    /// Parse an annotation table. Row numbers in errors count data rows from 1.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ValidationError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?
            .clone();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ValidationError::EmptyTable);
        }
        let columns = ColumnIndex::from_headers(&headers)?;

        let mut records = Vec::new();
        let mut rows = Vec::new();
        for (i, result) in csv_reader.records().enumerate() {
            let row = i + 1;
            let record = result.map_err(|e| ValidationError::MalformedRow {
                row,
                message: e.to_string(),
            })?;

            // Blank lines carry no annotation
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            let begin_offset = number(&record, columns.begin, row, "Begin Offset")?;
            let end_offset = number(&record, columns.end, row, "End Offset")?;
            if begin_offset >= end_offset {
                return Err(ValidationError::InvalidSpan {
                    row,
                    begin: begin_offset,
                    end: end_offset,
                });
            }

            records.push(AnnotationRecord {
                document_id: field(&record, columns.file, row, "File")?.to_string(),
                line_number: number(&record, columns.line, row, "Line")?,
                begin_offset,
                end_offset,
                label_type: field(&record, columns.label, row, "Type")?.to_string(),
            });
            rows.push(row);
        }

        if records.is_empty() {
            return Err(ValidationError::EmptyTable);
        }
        debug!("Loaded {} annotations", records.len());
        Ok(Self { records, rows })
    }

    pub fn from_path(path: &Path) -> Result<Self, ValidationError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ValidationError::Unreadable(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct labels in first-seen order.
    pub fn label_set(&self) -> Result<LabelSet, ValidationError> {
        LabelSet::from_labels(self.records.iter().map(|r| r.label_type.as_str()))
    }

    /// Mentions per label, in first-seen order.
    pub fn label_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in &self.records {
            match counts.iter_mut().find(|(label, _)| *label == record.label_type) {
                Some((_, count)) => *count += 1,
                None => counts.push((record.label_type.clone(), 1)),
            }
        }
        counts
    }

    /// Check every span against the documents it annotates.
    ///
    /// Each record must name a known document, a line inside it, and an end
    /// offset within that line's character length.
    pub fn cross_reference(&self, documents: &DocumentSet) -> Result<(), ValidationError> {
        for (record, &row) in self.records.iter().zip(&self.rows) {
            let lines = documents.lines(&record.document_id).ok_or_else(|| {
                ValidationError::UnknownDocument {
                    row,
                    document: record.document_id.clone(),
                }
            })?;

            let length = usize::try_from(record.line_number)
                .ok()
                .and_then(|line| lines.get(line))
                .copied()
                .ok_or_else(|| ValidationError::LineOutOfRange {
                    row,
                    document: record.document_id.clone(),
                    line: record.line_number,
                    lines: lines.len(),
                })?;

            if record.end_offset > length as u64 {
                return Err(ValidationError::OffsetOutOfRange {
                    row,
                    document: record.document_id.clone(),
                    line: record.line_number,
                    end: record.end_offset,
                    length,
                });
            }
        }
        Ok(())
    }
}

/// Labels from `counts` with fewer than `min_mentions` annotations. Each one
/// is logged.
pub fn sparse_labels(counts: &[(String, usize)], min_mentions: usize) -> Vec<(String, usize)> {
    let sparse: Vec<(String, usize)> = counts
        .iter()
        .filter(|(_, count)| *count < min_mentions)
        .cloned()
        .collect();
    for (label, count) in &sparse {
        warn!(
            "Label '{}' has {} annotations; the service expects at least {}",
            label, count, min_mentions
        );
    }
    sparse
}

/// Line lengths (in characters) of the documents that will be uploaded,
/// keyed by the name annotations use to reference them.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    documents: HashMap<String, Vec<usize>>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-document-per-line file under `name`.
    pub fn add(&mut self, name: &str, text: &str) {
        let lines = text.lines().map(|l| l.chars().count()).collect();
        self.documents.insert(name.to_string(), lines);
    }

    pub fn with_document(mut self, name: &str, text: &str) -> Self {
        self.add(name, text);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    /// Character length of each line in `name`.
    pub fn lines(&self, name: &str) -> Option<&[usize]> {
        self.documents.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
