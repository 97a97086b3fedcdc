use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Modality;

#[derive(Debug, Error, Diagnostic)]
pub enum M2eError {
    #[error("invalid case barcode: {0}")]
    InvalidBarcode(String),

    #[error("invalid project name: {0}")]
    InvalidProject(String),

    #[error("missing config file m2e.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error(
        "{project}: {modality} files on disk do not match metadata \
         (missing on disk: {missing_on_disk:?}, missing in metadata: {missing_in_metadata:?})"
    )]
    #[diagnostic(help("the project download looks incomplete or corrupt; fetch it again"))]
    FileSetMismatch {
        project: String,
        modality: Modality,
        missing_on_disk: Vec<String>,
        missing_in_metadata: Vec<String>,
    },

    #[error("{project}/{case}: expected {expected} {modality} values, got {actual}")]
    ShapeMismatch {
        project: String,
        case: String,
        modality: Modality,
        expected: usize,
        actual: usize,
    },

    #[error("dataset column order drifted: expected {expected:?}, got {actual:?}")]
    ColumnOrderDrift {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("case {case} not found in project {project}")]
    CaseNotFound { project: String, case: String },

    #[error("gene {gene} not found in expression data of case {case}")]
    GeneNotFound { case: String, gene: String },

    #[error("CpG {cpg} not found in methylation data of case {case}")]
    CpgNotFound { case: String, cpg: String },

    #[error("failed to parse metadata table {path}: {message}")]
    MetadataParse { path: String, message: String },

    #[error("failed to parse data file {path}: {message}")]
    DataParse { path: String, message: String },

    #[error("{0}")]
    Selection(String),

    #[error("fetch request failed: {0}")]
    FetchHttp(String),

    #[error("fetch returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("annotation error: {0}")]
    Annotation(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl M2eError {
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            M2eError::CaseNotFound { .. }
                | M2eError::GeneNotFound { .. }
                | M2eError::CpgNotFound { .. }
                | M2eError::ProjectNotFound(_)
        )
    }

    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            M2eError::FileSetMismatch { .. }
                | M2eError::ShapeMismatch { .. }
                | M2eError::ColumnOrderDrift { .. }
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, M2eError::FetchHttp(_) | M2eError::FetchStatus { .. })
    }
}
