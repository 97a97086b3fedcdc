use std::collections::{HashMap, HashSet};
use std::path::Path;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{CaseId, CpgId, GeneId, Modality, ProjectName};
use crate::error::M2eError;
use crate::fs_util::write_atomic;
use crate::loader::{CaseDataLoader, LoadRequest, Readings};
use crate::metadata::ReconcileWarning;
use crate::project::Project;

pub const EXPRESSION_COLUMN: &str = "expression";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RowKey {
    pub case: CaseId,
    pub gene: GeneId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    index: Vec<RowKey>,
    rows: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[RowKey] {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &[f64])> {
        self.index
            .iter()
            .zip(self.rows.iter().map(|row| row.as_slice()))
    }

    fn expression_col(&self) -> Result<usize, M2eError> {
        self.columns
            .iter()
            .position(|column| column == EXPRESSION_COLUMN)
            .ok_or_else(|| M2eError::ColumnOrderDrift {
                expected: vec![EXPRESSION_COLUMN.to_string()],
                actual: self.columns.clone(),
            })
    }

    pub fn features(&self) -> Result<Features, M2eError> {
        let target = self.expression_col()?;
        let keep = |idx: &usize| *idx != target;
        let columns = (0..self.columns.len())
            .filter(keep)
            .map(|idx| self.columns[idx].clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(idx, _)| keep(idx))
                    .map(|(_, value)| *value)
                    .collect()
            })
            .collect();
        Ok(Features { columns, rows })
    }

    pub fn target(&self) -> Result<Vec<f64>, M2eError> {
        let target = self.expression_col()?;
        Ok(self.rows.iter().map(|row| row[target]).collect())
    }

    pub fn subset_cases(&self, cases: &[CaseId]) -> Dataset {
        let wanted: HashSet<&CaseId> = cases.iter().collect();
        let (index, rows) = self
            .index
            .iter()
            .zip(self.rows.iter())
            .filter(|(key, _)| wanted.contains(&key.case))
            .map(|(key, row)| (key.clone(), row.clone()))
            .unzip();
        Dataset {
            columns: self.columns.clone(),
            index,
            rows,
        }
    }

    pub fn write_tsv(&self, path: &Path) -> Result<(), M2eError> {
        write_atomic(path, |writer| {
            let mut csv_writer = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .from_writer(writer);
            let header = ["case", "gene"]
                .into_iter()
                .chain(self.columns.iter().map(|column| column.as_str()));
            csv_writer
                .write_record(header)
                .map_err(|err| M2eError::Filesystem(err.to_string()))?;
            for (key, row) in self.iter() {
                let mut record = Vec::with_capacity(row.len() + 2);
                record.push(key.case.to_string());
                record.push(key.gene.to_string());
                record.extend(row.iter().map(|value| value.to_string()));
                csv_writer
                    .write_record(&record)
                    .map_err(|err| M2eError::Filesystem(err.to_string()))?;
            }
            csv_writer
                .flush()
                .map_err(|err| M2eError::Filesystem(err.to_string()))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn aggregate_case(
    case: &CaseId,
    expression: &Readings<GeneId>,
    methylation: &Readings<CpgId>,
) -> Dataset {
    let columns = std::iter::once(EXPRESSION_COLUMN.to_string())
        .chain(methylation.ids().iter().map(|cpg| cpg.to_string()))
        .collect();
    let mut index = Vec::with_capacity(expression.len());
    let mut rows = Vec::with_capacity(expression.len());
    for (gene, value) in expression.iter() {
        let mut row = Vec::with_capacity(methylation.len() + 1);
        row.push(value);
        row.extend_from_slice(methylation.values());
        index.push(RowKey {
            case: case.clone(),
            gene: gene.clone(),
        });
        rows.push(row);
    }
    Dataset {
        columns,
        index,
        rows,
    }
}

/// Keeps only the columns present in every block, in first-block order.
pub fn concat_inner(blocks: Vec<Dataset>) -> Dataset {
    let Some(first) = blocks.first() else {
        return Dataset::default();
    };
    let shared: Vec<String> = first
        .columns
        .iter()
        .filter(|column| blocks.iter().all(|block| block.columns.contains(column)))
        .cloned()
        .collect();

    let mut index = Vec::new();
    let mut rows = Vec::new();
    for block in blocks.iter() {
        let positions: HashMap<&str, usize> = block
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.as_str(), idx))
            .collect();
        let picks: Vec<usize> = shared
            .iter()
            .map(|column| positions[column.as_str()])
            .collect();
        index.extend(block.index.iter().cloned());
        rows.extend(
            block
                .rows
                .iter()
                .map(|row| picks.iter().map(|&idx| row[idx]).collect::<Vec<_>>()),
        );
    }
    Dataset {
        columns: shared,
        index,
        rows,
    }
}

fn check_columns(expected: &[String], dataset: Dataset) -> Result<Dataset, M2eError> {
    if dataset.columns != expected {
        return Err(M2eError::ColumnOrderDrift {
            expected: expected.to_vec(),
            actual: dataset.columns,
        });
    }
    Ok(dataset)
}

pub fn expected_columns(cpgs: &[CpgId]) -> Vec<String> {
    std::iter::once(EXPRESSION_COLUMN.to_string())
        .chain(cpgs.iter().map(|cpg| cpg.to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub projects: Vec<ProjectName>,
    pub cases: usize,
    pub rows: usize,
    pub warnings: Vec<ReconcileWarning>,
}

pub struct DatasetBuilder<'a> {
    projects_dir: &'a Utf8Path,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(projects_dir: &'a Utf8Path) -> Self {
        Self { projects_dir }
    }

    pub fn load_projects(&self, names: &[ProjectName]) -> Result<Vec<Project>, M2eError> {
        names
            .iter()
            .map(|name| Project::load(self.projects_dir, name.clone()))
            .collect()
    }

    pub fn build(
        &self,
        names: &[ProjectName],
        genes: &[GeneId],
        cpgs: &[CpgId],
        sink: &dyn ProgressSink,
    ) -> Result<(Dataset, BuildReport), M2eError> {
        let projects = self.load_projects(names)?;
        build_dataset(&projects, genes, cpgs, sink)
    }
}

pub fn build_dataset(
    projects: &[Project],
    genes: &[GeneId],
    cpgs: &[CpgId],
    sink: &dyn ProgressSink,
) -> Result<(Dataset, BuildReport), M2eError> {
    let expected = expected_columns(cpgs);
    let mut blocks = Vec::new();
    let mut warnings = Vec::new();

    for project in projects {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Build; project {} ({} cases)",
                project.name(),
                project.catalogue().len()
            ),
            elapsed: None,
        });
        warnings.extend(project.warnings().iter().cloned());

        let loader = CaseDataLoader::new(project);
        for case in project.case_ids() {
            let data = loader.load(case, LoadRequest::both(Some(genes), Some(cpgs)))?;
            let shape_err = |modality: Modality, expected: usize, actual: usize| M2eError::ShapeMismatch {
                project: project.name().to_string(),
                case: case.to_string(),
                modality,
                expected,
                actual,
            };
            let expression = data
                .expression
                .ok_or_else(|| shape_err(Modality::Expression, genes.len(), 0))?;
            let methylation = data
                .methylation
                .ok_or_else(|| shape_err(Modality::Methylation, cpgs.len(), 0))?;
            if expression.len() != genes.len() {
                return Err(shape_err(Modality::Expression, genes.len(), expression.len()));
            }
            if methylation.len() != cpgs.len() {
                return Err(shape_err(Modality::Methylation, cpgs.len(), methylation.len()));
            }

            let block = aggregate_case(case, &expression, &methylation);
            blocks.push(check_columns(&expected, block)?);
        }
    }

    let cases = blocks.len();
    let dataset = if cases == 0 {
        Dataset {
            columns: expected,
            ..Dataset::default()
        }
    } else {
        check_columns(&expected, concat_inner(blocks))?
    };

    info!(cases, rows = dataset.len(), "dataset built");
    let report = BuildReport {
        projects: projects.iter().map(|project| project.name().clone()).collect(),
        cases,
        rows: dataset.len(),
        warnings,
    };
    Ok((dataset, report))
}

pub fn projects_cases(projects: &[Project]) -> Vec<(CaseId, ProjectName)> {
    let mut assignments: Vec<(CaseId, ProjectName)> = Vec::new();
    let mut positions = HashMap::<CaseId, usize>::new();
    for project in projects {
        for case in project.case_ids() {
            match positions.get(case) {
                Some(&pos) => assignments[pos].1 = project.name().clone(),
                None => {
                    positions.insert(case.clone(), assignments.len());
                    assignments.push((case.clone(), project.name().clone()));
                }
            }
        }
    }
    assignments
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainTestSplit {
    pub train: Vec<CaseId>,
    pub test: Vec<CaseId>,
    pub test_projects: Vec<ProjectName>,
}

pub fn split_train_test_cases(assignments: &[(CaseId, ProjectName)], test_projects: usize) -> TrainTestSplit {
    let mut counts: Vec<(ProjectName, usize)> = Vec::new();
    for (_, project) in assignments {
        match counts.iter_mut().find(|(name, _)| name == project) {
            Some((_, count)) => *count += 1,
            None => counts.push((project.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let held_out: Vec<ProjectName> = counts
        .iter()
        .skip(counts.len().saturating_sub(test_projects))
        .map(|(name, _)| name.clone())
        .collect();

    let (test, train): (Vec<_>, Vec<_>) = assignments
        .iter()
        .partition(|(_, project)| held_out.contains(project));
    TrainTestSplit {
        train: train.into_iter().map(|(case, _)| case.clone()).collect(),
        test: test.into_iter().map(|(case, _)| case.clone()).collect(),
        test_projects: held_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genes(ids: &[&str]) -> Vec<GeneId> {
        ids.iter().map(|id| GeneId::new(id)).collect()
    }

    fn cpgs(ids: &[&str]) -> Vec<CpgId> {
        ids.iter().map(|id| CpgId::new(id)).collect()
    }

    #[test]
    fn aggregate_repeats_methylation_per_gene() {
        let case: CaseId = "TCGA-AA-0001-01A".parse().unwrap();
        let expression = Readings::new(genes(&["g1", "g2", "g3", "g4"]), vec![1.0, 2.0, 3.0, 4.0]);
        let methylation = Readings::new(cpgs(&["c1", "c2", "c3"]), vec![-1.0, -2.0, -3.0]);

        let block = aggregate_case(&case, &expression, &methylation);
        assert_eq!(block.columns(), &["expression", "c1", "c2", "c3"]);
        assert_eq!(
            block.rows(),
            &[
                vec![1.0, -1.0, -2.0, -3.0],
                vec![2.0, -1.0, -2.0, -3.0],
                vec![3.0, -1.0, -2.0, -3.0],
                vec![4.0, -1.0, -2.0, -3.0],
            ]
        );
        assert_eq!(block.index()[3].gene.as_str(), "g4");
    }

    #[test]
    fn concat_keeps_shared_columns_only() {
        let a = Dataset {
            columns: vec!["expression".into(), "c1".into(), "c2".into()],
            index: vec![RowKey {
                case: "A-B-C-D".parse().unwrap(),
                gene: GeneId::new("g1"),
            }],
            rows: vec![vec![1.0, 2.0, 3.0]],
        };
        let b = Dataset {
            columns: vec!["c2".into(), "expression".into()],
            index: vec![RowKey {
                case: "A-B-C-E".parse().unwrap(),
                gene: GeneId::new("g1"),
            }],
            rows: vec![vec![9.0, 8.0]],
        };
        let merged = concat_inner(vec![a, b]);
        assert_eq!(merged.columns(), &["expression", "c2"]);
        assert_eq!(merged.rows(), &[vec![1.0, 3.0], vec![8.0, 9.0]]);
    }

    #[test]
    fn drifting_cpg_sets_are_rejected() {
        let expected = expected_columns(&cpgs(&["c1", "c2"]));
        let a = aggregate_case(
            &"TCGA-AA-0001-01A".parse().unwrap(),
            &Readings::new(genes(&["g1"]), vec![1.0]),
            &Readings::new(cpgs(&["c1", "c2"]), vec![0.1, 0.2]),
        );
        let b = aggregate_case(
            &"TCGA-AA-0002-01A".parse().unwrap(),
            &Readings::new(genes(&["g1"]), vec![2.0]),
            &Readings::new(cpgs(&["c2", "c3"]), vec![0.3, 0.4]),
        );
        assert!(check_columns(&expected, a.clone()).is_ok());

        let merged = concat_inner(vec![a, b]);
        assert_eq!(merged.columns(), &["expression", "c2"]);
        match check_columns(&expected, merged) {
            Err(M2eError::ColumnOrderDrift { expected: want, actual }) => {
                assert_eq!(want, expected);
                assert_eq!(actual, vec!["expression".to_string(), "c2".to_string()]);
            }
            other => panic!("expected column drift, got {other:?}"),
        }
    }

    #[test]
    fn features_and_target_split_columns() {
        let case: CaseId = "TCGA-AA-0001-01A".parse().unwrap();
        let block = aggregate_case(
            &case,
            &Readings::new(genes(&["g1", "g2"]), vec![5.0, 6.0]),
            &Readings::new(cpgs(&["c1"]), vec![0.5]),
        );
        assert_eq!(block.target().unwrap(), vec![5.0, 6.0]);
        let features = block.features().unwrap();
        assert_eq!(features.columns, vec!["c1".to_string()]);
        assert_eq!(features.rows, vec![vec![0.5], vec![0.5]]);
    }

    fn assignments(counts: &[(&str, usize)]) -> Vec<(CaseId, ProjectName)> {
        let mut out = Vec::new();
        for (project, count) in counts {
            for idx in 0..*count {
                out.push((
                    format!("{project}-X-{idx:04}-01A").parse().unwrap(),
                    project.parse().unwrap(),
                ));
            }
        }
        out
    }

    #[test]
    fn split_holds_out_smallest_projects() {
        let cases = assignments(&[("P-BIG", 5), ("P-SMALL", 1), ("P-MID", 3), ("P-TINY", 2)]);
        let split = split_train_test_cases(&cases, 2);

        let held: Vec<&str> = split.test_projects.iter().map(|p| p.as_str()).collect();
        assert_eq!(held, vec!["P-TINY", "P-SMALL"]);
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 8);
    }

    #[test]
    fn split_with_more_holdouts_than_projects_tests_everything() {
        let cases = assignments(&[("P-A", 2), ("P-B", 1)]);
        let split = split_train_test_cases(&cases, 17);
        assert!(split.train.is_empty());
        assert_eq!(split.test.len(), 3);
    }
}
