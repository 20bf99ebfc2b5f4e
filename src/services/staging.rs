//! Staging of training data into object storage.
//!
//! Everything is read and validated locally first; uploads then happen one
//! at a time and each is acknowledged before the next starts, so a returned
//! location always refers to a stored object.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{JobError, ValidationError};
use crate::models::{InputFormat, LabelSet};
use crate::recognition::{AnnotationLocations, DocumentLocations};
use crate::services::annotations::{AnnotationTable, DocumentSet};
use crate::storage::{BlobStore, BlobUri};

// Training and test inputs get their own folders so equally named files
// never overwrite each other.
const TRAIN_DOCUMENTS: &str = "documents/train";
const TEST_DOCUMENTS: &str = "documents/test";
const TRAIN_ANNOTATIONS: &str = "annotations/train";
const TEST_ANNOTATIONS: &str = "annotations/test";

/// Local files making up one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    pub train_documents: PathBuf,
    pub train_annotations: PathBuf,
    pub test_documents: Option<PathBuf>,
    pub test_annotations: Option<PathBuf>,
    pub format: InputFormat,
}

/// Locations of uploaded training data, ready for a training request.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedTrainingData {
    pub documents: DocumentLocations,
    pub annotations: AnnotationLocations,
    pub labels: LabelSet,
    /// Mentions per label in the training annotations.
    pub label_counts: Vec<(String, usize)>,
}

/// A file read into memory, named the way annotations reference it.
struct LocalFile {
    name: String,
    bytes: Vec<u8>,
}

async fn read_local(path: &Path) -> Result<LocalFile, ValidationError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ValidationError::InvalidInput(format!("not a file: {}", path.display())))?
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ValidationError::Unreadable(format!("{}: {}", path.display(), e)))?;
    Ok(LocalFile { name, bytes })
}

fn document_set(file: &LocalFile) -> Result<DocumentSet, ValidationError> {
    let text = std::str::from_utf8(&file.bytes)
        .map_err(|e| ValidationError::Unreadable(format!("{}: {}", file.name, e)))?;
    Ok(DocumentSet::new().with_document(&file.name, text))
}

/// Uploads training inputs under `{prefix}/{kind}/{file name}`.
pub struct Stager {
    store: Arc<dyn BlobStore>,
    bucket: String,
    prefix: String,
}

impl Stager {
    pub fn new(store: Arc<dyn BlobStore>, bucket: &str, prefix: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn key_for(&self, kind: &str, file_name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/{}", kind, file_name)
        } else {
            format!("{}/{}/{}", self.prefix, kind, file_name)
        }
    }

    /// Prefix under which batch detection output for `job_name` is written.
    pub fn output_prefix(&self, job_name: &str) -> Result<BlobUri, JobError> {
        Ok(BlobUri::new(&self.bucket, &self.key_for("output", job_name))?)
    }

    pub async fn upload(&self, kind: &str, name: &str, bytes: &[u8]) -> Result<BlobUri, JobError> {
        let key = self.key_for(kind, name);
        let uri = self.store.put(&self.bucket, &key, bytes).await?;
        info!("Uploaded {} ({} bytes)", uri, bytes.len());
        Ok(uri)
    }

    pub async fn upload_file(&self, kind: &str, path: &Path) -> Result<BlobUri, JobError> {
        let file = read_local(path).await?;
        self.upload(kind, &file.name, &file.bytes).await
    }

    /// Validate training inputs and upload them.
    ///
    /// Annotation tables are parsed and cross-referenced against the
    /// documents they tag before anything is uploaded.
    pub async fn stage_training_data(
        &self,
        data: &TrainingData,
    ) -> Result<StagedTrainingData, JobError> {
        let train_docs = read_local(&data.train_documents).await?;
        let train_notes = read_local(&data.train_annotations).await?;
        let test_docs = match data.test_documents {
            Some(ref path) => Some(read_local(path).await?),
            None => None,
        };
        let test_notes = match data.test_annotations {
            Some(ref path) => Some(read_local(path).await?),
            None => None,
        };

        let train_table = AnnotationTable::from_reader(train_notes.bytes.as_slice())?;
        train_table.cross_reference(&document_set(&train_docs)?)?;
        let labels = train_table.label_set()?;

        match (&test_docs, &test_notes) {
            (Some(docs), Some(notes)) => {
                let test_table = AnnotationTable::from_reader(notes.bytes.as_slice())?;
                test_table.cross_reference(&document_set(docs)?)?;
                if let Some(unknown) = test_table
                    .records()
                    .iter()
                    .find(|r| !labels.contains(&r.label_type))
                {
                    return Err(ValidationError::InvalidInput(format!(
                        "test annotations use label '{}' which is not in the training annotations",
                        unknown.label_type
                    ))
                    .into());
                }
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::InvalidInput(
                    "test documents and test annotations must be given together".to_string(),
                )
                .into())
            }
        }

        // Upload strictly in order
        let train_documents = self
            .upload(TRAIN_DOCUMENTS, &train_docs.name, &train_docs.bytes)
            .await?;
        let test_documents = match test_docs {
            Some(ref docs) => Some(self.upload(TEST_DOCUMENTS, &docs.name, &docs.bytes).await?),
            None => None,
        };
        let train_annotations = self
            .upload(TRAIN_ANNOTATIONS, &train_notes.name, &train_notes.bytes)
            .await?;
        let test_annotations = match test_notes {
            Some(ref notes) => Some(
                self.upload(TEST_ANNOTATIONS, &notes.name, &notes.bytes)
                    .await?,
            ),
            None => None,
        };

        Ok(StagedTrainingData {
            documents: DocumentLocations {
                train: train_documents.to_string(),
                test: test_documents.map(|u| u.to_string()),
                format: data.format,
            },
            annotations: AnnotationLocations {
                train: train_annotations.to_string(),
                test: test_annotations.map(|u| u.to_string()),
            },
            labels,
            label_counts: train_table.label_counts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use tempfile::tempdir;

    const DOCS: &str = "what 2008 disney animated film starred john travolta\n";

    #[test]
    fn test_key_layout() {
        let store = Arc::new(MemoryBlobStore::new());
        assert_eq!(
            Stager::new(store.clone(), "b", "/movies/").key_for("documents", "train.txt"),
            "movies/documents/train.txt"
        );
        assert_eq!(
            Stager::new(store, "b", "").key_for("annotations", "train.csv"),
            "annotations/train.csv"
        );
    }

    #[tokio::test]
    async fn test_stage_training_data() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("train.txt");
        let notes = dir.path().join("train.csv");
        std::fs::write(&docs, DOCS).unwrap();
        std::fs::write(
            &notes,
            "File,Line,Begin Offset,End Offset,Type\ntrain.txt,0,39,52,Actor\ntrain.txt,0,5,9,Year\n",
        )
        .unwrap();

        let store = Arc::new(MemoryBlobStore::new());
        let stager = Stager::new(store.clone(), "bucket", "movies");
        let staged = stager
            .stage_training_data(&TrainingData {
                train_documents: docs,
                train_annotations: notes,
                test_documents: None,
                test_annotations: None,
                format: InputFormat::OneDocumentPerLine,
            })
            .await
            .unwrap();

        assert_eq!(
            staged.documents.train,
            "s3://bucket/movies/documents/train/train.txt"
        );
        assert_eq!(
            staged.annotations.train,
            "s3://bucket/movies/annotations/train/train.csv"
        );
        assert_eq!(staged.labels.as_slice(), &["Actor", "Year"]);
        assert_eq!(
            store.keys("bucket"),
            vec![
                "movies/annotations/train/train.csv",
                "movies/documents/train/train.txt"
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_annotations_upload_nothing() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("train.txt");
        let notes = dir.path().join("train.csv");
        std::fs::write(&docs, DOCS).unwrap();
        std::fs::write(
            &notes,
            "File,Line,Begin Offset,End Offset,Type\ntrain.txt,0,39,80,Actor\n",
        )
        .unwrap();

        let store = Arc::new(MemoryBlobStore::new());
        let stager = Stager::new(store.clone(), "bucket", "movies");
        let err = stager
            .stage_training_data(&TrainingData {
                train_documents: docs,
                train_annotations: notes,
                test_documents: None,
                test_annotations: None,
                format: InputFormat::OneDocumentPerLine,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            JobError::Validation(ValidationError::OffsetOutOfRange { .. })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_same_file_names_keep_train_and_test_apart() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("train")).unwrap();
        std::fs::create_dir(dir.path().join("test")).unwrap();
        let header = "File,Line,Begin Offset,End Offset,Type\n";
        let paths = |split: &str| {
            (
                dir.path().join(split).join("docs.txt"),
                dir.path().join(split).join("notes.csv"),
            )
        };
        let (train_docs, train_notes) = paths("train");
        let (test_docs, test_notes) = paths("test");
        std::fs::write(&train_docs, DOCS).unwrap();
        std::fs::write(&train_notes, format!("{}docs.txt,0,39,52,Actor\n", header)).unwrap();
        std::fs::write(&test_docs, "TEST  john travolta\n").unwrap();
        std::fs::write(&test_notes, format!("{}docs.txt,0,6,19,Actor\n", header)).unwrap();

        let store = Arc::new(MemoryBlobStore::new());
        let stager = Stager::new(store.clone(), "b", "p");
        let staged = stager
            .stage_training_data(&TrainingData {
                train_documents: train_docs,
                train_annotations: train_notes,
                test_documents: Some(test_docs),
                test_annotations: Some(test_notes),
                format: InputFormat::OneDocumentPerLine,
            })
            .await
            .unwrap();

        assert_ne!(Some(&staged.documents.train), staged.documents.test.as_ref());
        assert_ne!(
            Some(&staged.annotations.train),
            staged.annotations.test.as_ref()
        );
        assert_eq!(store.len(), 4);

        let train = BlobUri::parse(&staged.documents.train).unwrap();
        assert_eq!(store.get(&train).await.unwrap(), DOCS.as_bytes());
        let test = BlobUri::parse(staged.documents.test.as_deref().unwrap()).unwrap();
        assert_eq!(store.get(&test).await.unwrap(), b"TEST  john travolta\n");
    }
}
