use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{CaseId, FileId, Modality, ProjectName};
use crate::error::M2eError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub file_name: String,
    pub case_barcode: String,
    pub case_id: CaseId,
}

#[derive(Debug, Deserialize)]
struct RawFileRow {
    file_id: String,
    file_name: String,
    cases: String,
}

#[derive(Debug, Clone)]
pub struct MetadataTable {
    pub modality: Modality,
    pub records: Vec<FileRecord>,
}

impl MetadataTable {
    pub fn load(path: &Path, modality: Modality) -> Result<Self, M2eError> {
        let file = File::open(path).map_err(|err| M2eError::MetadataParse {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_reader(BufReader::new(file), modality, &path.display().to_string())
    }

    pub fn from_reader<R: Read>(reader: R, modality: Modality, source: &str) -> Result<Self, M2eError> {
        let parse_err = |message: String| M2eError::MetadataParse {
            path: source.to_string(),
            message,
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let mut records = Vec::new();
        let mut seen = BTreeSet::new();
        for row in csv_reader.deserialize::<RawFileRow>() {
            let row = row.map_err(|err| parse_err(err.to_string()))?;
            let file_id = FileId::new(row.file_id.trim());
            if !seen.insert(file_id.clone()) {
                return Err(parse_err(format!("duplicate file_id {file_id}")));
            }
            let case_id = CaseId::from_barcode(&row.cases)?;
            records.push(FileRecord {
                file_id,
                file_name: row.file_name.trim().to_string(),
                case_barcode: row.cases,
                case_id,
            });
        }

        Ok(Self { modality, records })
    }

    pub fn file_ids(&self) -> BTreeSet<FileId> {
        self.records.iter().map(|record| record.file_id.clone()).collect()
    }

    pub fn duplicated_cases(&self) -> BTreeSet<CaseId> {
        let mut counts = BTreeMap::<&CaseId, usize>::new();
        for record in &self.records {
            *counts.entry(&record.case_id).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(case, _)| case.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseRecord {
    pub methylation: FileRecord,
    pub expression: FileRecord,
}

impl CaseRecord {
    pub fn file(&self, modality: Modality) -> &FileRecord {
        match modality {
            Modality::Methylation => &self.methylation,
            Modality::Expression => &self.expression,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseCatalogue {
    cases: BTreeMap<CaseId, CaseRecord>,
}

impl CaseCatalogue {
    pub fn get(&self, case: &CaseId) -> Option<&CaseRecord> {
        self.cases.get(case)
    }

    pub fn case_ids(&self) -> impl Iterator<Item = &CaseId> {
        self.cases.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaseId, &CaseRecord)> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileWarning {
    DuplicateCases {
        project: String,
        cases: Vec<CaseId>,
    },
    CaseSetMismatch {
        project: String,
        only_methylation: Vec<CaseId>,
        only_expression: Vec<CaseId>,
    },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::DuplicateCases { project, cases } => write!(
                f,
                "{project}: dropping {} duplicated case(s) from both modalities",
                cases.len()
            ),
            ReconcileWarning::CaseSetMismatch {
                project,
                only_methylation,
                only_expression,
            } => write!(
                f,
                "{project}: methylation and expression cases differ \
                 ({} methylation-only, {} expression-only); keeping the intersection",
                only_methylation.len(),
                only_expression.len()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub catalogue: CaseCatalogue,
    pub warnings: Vec<ReconcileWarning>,
}

// mismatched file sets are fatal; duplicated or unpaired cases only warn
pub fn reconcile(
    project: &ProjectName,
    methylation: &MetadataTable,
    expression: &MetadataTable,
    available: &BTreeMap<Modality, BTreeSet<FileId>>,
) -> Result<Reconciliation, M2eError> {
    let empty = BTreeSet::new();
    for table in [methylation, expression] {
        let on_disk = available.get(&table.modality).unwrap_or(&empty);
        check_file_set(project, table, on_disk)?;
    }

    let mut warnings = Vec::new();

    let dropped: BTreeSet<CaseId> = methylation
        .duplicated_cases()
        .union(&expression.duplicated_cases())
        .cloned()
        .collect();
    if !dropped.is_empty() {
        let warning = ReconcileWarning::DuplicateCases {
            project: project.to_string(),
            cases: dropped.iter().cloned().collect(),
        };
        warn!("{warning}");
        warnings.push(warning);
    }

    let index = |table: &MetadataTable| -> BTreeMap<CaseId, FileRecord> {
        table
            .records
            .iter()
            .filter(|record| !dropped.contains(&record.case_id))
            .map(|record| (record.case_id.clone(), record.clone()))
            .collect()
    };
    let mut meth_by_case = index(methylation);
    let mut expr_by_case = index(expression);

    let only_methylation: Vec<CaseId> = meth_by_case
        .keys()
        .filter(|case| !expr_by_case.contains_key(*case))
        .cloned()
        .collect();
    let only_expression: Vec<CaseId> = expr_by_case
        .keys()
        .filter(|case| !meth_by_case.contains_key(*case))
        .cloned()
        .collect();
    if !only_methylation.is_empty() || !only_expression.is_empty() {
        for case in &only_methylation {
            meth_by_case.remove(case);
        }
        for case in &only_expression {
            expr_by_case.remove(case);
        }
        let warning = ReconcileWarning::CaseSetMismatch {
            project: project.to_string(),
            only_methylation,
            only_expression,
        };
        warn!("{warning}");
        warnings.push(warning);
    }

    let cases = meth_by_case
        .into_iter()
        .filter_map(|(case, methylation)| {
            expr_by_case.remove(&case).map(|expression| {
                (
                    case,
                    CaseRecord {
                        methylation,
                        expression,
                    },
                )
            })
        })
        .collect();

    Ok(Reconciliation {
        catalogue: CaseCatalogue { cases },
        warnings,
    })
}

fn check_file_set(
    project: &ProjectName,
    table: &MetadataTable,
    on_disk: &BTreeSet<FileId>,
) -> Result<(), M2eError> {
    let in_metadata = table.file_ids();
    if &in_metadata == on_disk {
        return Ok(());
    }
    Err(M2eError::FileSetMismatch {
        project: project.to_string(),
        modality: table.modality,
        missing_on_disk: in_metadata
            .difference(on_disk)
            .map(|id| id.to_string())
            .collect(),
        missing_in_metadata: on_disk
            .difference(&in_metadata)
            .map(|id| id.to_string())
            .collect(),
    })
}
