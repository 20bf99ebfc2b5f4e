//! Batch detection output reading.
//!
//! Output is line-delimited JSON, one line per input document. The service
//! usually delivers it as `output.tar.gz` holding a single `output` member;
//! raw JSON lines are accepted as well. Lines that do not match the schema
//! are skipped and counted.

use std::io::{BufRead, Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::models::{DetectionJobHandle, DetectionReport, DocumentEntities};
use crate::storage::{BlobStore, BlobUri};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Name of the archive member holding the JSON lines.
const OUTPUT_MEMBER: &str = "output";

/// Lazily parses detection output, one document per line.
pub struct ResultReader<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
    unparsable: usize,
}

impl<R: BufRead> ResultReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            unparsable: 0,
        }
    }

    /// Lines skipped so far.
    pub fn unparsable_lines(&self) -> usize {
        self.unparsable
    }

    /// Drain the remaining lines into a report.
    pub fn into_report(mut self) -> DetectionReport {
        let documents: Vec<DocumentEntities> = self.by_ref().collect();
        DetectionReport {
            documents,
            unparsable_lines: self.unparsable,
        }
    }

    fn skip(&mut self, reason: &str) {
        warn!("Skipping output line {}: {}", self.line_number, reason);
        self.unparsable += 1;
    }
}

impl<R: BufRead> Iterator for ResultReader<R> {
    type Item = DocumentEntities;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_number += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.skip("not valid UTF-8");
                    continue;
                }
                Err(e) => {
                    warn!("Stopped reading output at line {}: {}", self.line_number, e);
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<DocumentEntities>(&line) {
                Ok(doc) if doc.entities.iter().all(|e| e.is_well_formed()) => return Some(doc),
                Ok(_) => self.skip("entity with out-of-range score or offsets"),
                Err(e) => self.skip(&e.to_string()),
            }
        }
    }
}

fn is_tar(bytes: &[u8]) -> bool {
    bytes
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len())
        .map(|magic| magic == TAR_MAGIC)
        .unwrap_or(false)
}

fn extract_output_member(bytes: &[u8]) -> Result<Vec<u8>, JobError> {
    let mut archive = tar::Archive::new(bytes);
    let entries = archive
        .entries()
        .map_err(|e| JobError::Parse(format!("bad output archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| JobError::Parse(format!("bad output archive: {}", e)))?;
        let is_output = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n == OUTPUT_MEMBER))
            .unwrap_or(false);
        if is_output && entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| JobError::Parse(format!("bad output archive: {}", e)))?;
            return Ok(contents);
        }
    }
    Err(JobError::Parse(format!(
        "output archive has no '{}' member",
        OUTPUT_MEMBER
    )))
}

/// Unwrap gzip and tar layers, returning the JSON lines.
pub fn decode_output(bytes: &[u8]) -> Result<Vec<u8>, JobError> {
    let decompressed = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| JobError::Parse(format!("bad gzip output: {}", e)))?;
        out
    } else {
        bytes.to_vec()
    };

    if is_tar(&decompressed) {
        debug!("Output is a tar archive");
        extract_output_member(&decompressed)
    } else {
        Ok(decompressed)
    }
}

/// A lazy reader over an output object's bytes.
pub fn open_output(bytes: &[u8]) -> Result<ResultReader<Cursor<Vec<u8>>>, JobError> {
    Ok(ResultReader::new(Cursor::new(decode_output(bytes)?)))
}

/// Parse a whole output object.
pub fn read_output(bytes: &[u8]) -> Result<DetectionReport, JobError> {
    Ok(open_output(bytes)?.into_report())
}

/// Read output from a local file.
pub async fn read_path(path: &Path) -> Result<DetectionReport, JobError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| JobError::Parse(format!("{}: {}", path.display(), e)))?;
    read_output(&bytes)
}

/// Read output from the store. Stored output is immutable, so this can be
/// repeated and yields the same report each time.
pub async fn read_from_store(
    store: &dyn BlobStore,
    uri: &BlobUri,
) -> Result<DetectionReport, JobError> {
    let bytes = store.get(uri).await?;
    read_output(&bytes)
}

/// Read the output of a completed detection job.
pub async fn read_job_output(
    store: &dyn BlobStore,
    handle: &DetectionJobHandle,
) -> Result<DetectionReport, JobError> {
    let location = handle.output_location.as_deref().ok_or_else(|| {
        JobError::Parse(format!(
            "detection job {} has no output location yet",
            handle.job_identifier
        ))
    })?;
    read_from_store(store, &BlobUri::parse(location)?).await
}

/// Serialize one document's entities as an output line.
pub fn to_output_line(document: &DocumentEntities) -> Result<String, JobError> {
    serde_json::to_string(document).map_err(|e| JobError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectedEntity;
    use crate::storage::MemoryBlobStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LINES: &str = concat!(
        r#"{"File":"test.txt","Line":0,"Entities":[{"Text":"2008","Type":"Year","Score":0.99,"BeginOffset":5,"EndOffset":9}]}"#,
        "\n",
        r#"{"File":"test.txt","Line":1,"Entities":[]}"#,
        "\n",
    );

    fn tar_gz(member: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member, contents).unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_raw_lines() {
        let report = read_output(LINES.as_bytes()).unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.entity_count(), 1);
        assert_eq!(report.unparsable_lines, 0);
        assert_eq!(report.documents[0].entities[0].label_type, "Year");
    }

    #[test]
    fn test_archive() {
        let report = read_output(&tar_gz("output", LINES.as_bytes())).unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.documents[1].line, Some(1));
    }

    #[test]
    fn test_archive_without_output_member() {
        let err = read_output(&tar_gz("something-else", LINES.as_bytes())).unwrap_err();
        assert!(matches!(err, JobError::Parse(_)));
    }

    #[test]
    fn test_bad_lines_are_counted() {
        let input = format!(
            "{}not json\n{{\"Entities\":[{{\"Text\":\"x\",\"Type\":\"Actor\",\"Score\":7.0,\"BeginOffset\":0,\"EndOffset\":1}}]}}\n\n{{\"File\":\"a\"}}\n",
            LINES
        );
        let report = read_output(input.as_bytes()).unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.unparsable_lines, 3);
    }

    #[test]
    fn test_reader_is_lazy() {
        let mut reader = open_output(LINES.as_bytes()).unwrap();
        let first = reader.next().unwrap();
        assert_eq!(first.line, Some(0));
        assert_eq!(reader.unparsable_lines(), 0);
        assert!(reader.next().is_some());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_line_round_trip() {
        let doc = DocumentEntities {
            file: None,
            line: None,
            entities: vec![DetectedEntity {
                text: "john travolta".to_string(),
                label_type: "Actor".to_string(),
                confidence_score: 0.9856906946328695,
                begin_offset: 39,
                end_offset: 52,
            }],
        };
        let line = to_output_line(&doc).unwrap();
        let report = read_output(line.as_bytes()).unwrap();
        assert_eq!(report.documents, vec![doc]);
    }

    #[tokio::test]
    async fn test_read_from_store_twice() {
        let store = MemoryBlobStore::new();
        let uri = store
            .put("bucket", "out/job/output/output.tar.gz", &tar_gz("output", LINES.as_bytes()))
            .await
            .unwrap();
        let first = read_from_store(&store, &uri).await.unwrap();
        let second = read_from_store(&store, &uri).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_job_without_output_location() {
        let store = MemoryBlobStore::new();
        let handle = DetectionJobHandle {
            job_identifier: "job-1".to_string(),
            job_arn: "arn".to_string(),
            output_location: None,
        };
        assert!(read_job_output(&store, &handle).await.is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::models::DetectedEntity;
    use proptest::prelude::*;

    fn arb_entity() -> impl Strategy<Value = DetectedEntity> {
        ("[a-z ]{1,20}", "[A-Z][a-z]{0,10}", 0.0f64..=1.0, 0u64..10_000, 1u64..100).prop_map(
            |(text, label_type, confidence_score, begin_offset, len)| DetectedEntity {
                text,
                label_type,
                confidence_score,
                begin_offset,
                end_offset: begin_offset + len,
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        #[test]
        fn output_line_round_trip(
            entities in prop::collection::vec(arb_entity(), 0..8),
            line in prop::option::of(0u64..1_000_000),
        ) {
            let doc = DocumentEntities {
                file: Some("test.txt".to_string()),
                line,
                entities,
            };
            let encoded = to_output_line(&doc).unwrap();
            let report = read_output(encoded.as_bytes()).unwrap();
            prop_assert_eq!(report.unparsable_lines, 0);
            prop_assert_eq!(report.documents, vec![doc]);
        }

        #[test]
        fn score_survives_round_trip(score in 0.0f64..1.0) {
            let doc = DocumentEntities {
                file: None,
                line: None,
                entities: vec![DetectedEntity {
                    text: "john travolta".to_string(),
                    label_type: "Actor".to_string(),
                    confidence_score: score,
                    begin_offset: 39,
                    end_offset: 52,
                }],
            };
            let report = read_output(to_output_line(&doc).unwrap().as_bytes()).unwrap();
            prop_assert_eq!(
                report.documents[0].entities[0].confidence_score.to_bits(),
                score.to_bits()
            );
        }
    }
}
