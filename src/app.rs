use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::dataset::{BuildReport, Dataset, DatasetBuilder, TrainTestSplit, projects_cases, split_train_test_cases};
use crate::domain::{CaseId, CpgId, GeneId, ProjectName};
use crate::error::M2eError;
use crate::fetch::{FetchClient, get_cpgs, get_genome, get_gff};
use crate::genomics::Annotator;
use crate::metadata::ReconcileWarning;
use crate::model::{Evaluation, Regressor, train_and_evaluate};
use crate::project::{CasePaths, Project};
use crate::selection::all_projects;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct GenomicsItem {
    pub artifact: String,
    pub action: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenomicsResult {
    pub items: Vec<GenomicsItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseEntry {
    pub case: CaseId,
    pub paths: CasePaths,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectCases {
    pub project: ProjectName,
    pub cases: Vec<CaseEntry>,
    pub warnings: Vec<ReconcileWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CasesResult {
    pub projects: Vec<ProjectCases>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    #[serde(flatten)]
    pub report: BuildReport,
    pub genes: usize,
    pub cpgs: usize,
    pub output: Option<String>,
    pub built_at: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineResult {
    pub split: TrainTestSplit,
    pub evaluation: Evaluation,
}

pub struct App<F: FetchClient, A: Annotator> {
    config: ResolvedConfig,
    fetcher: F,
    annotator: A,
}

impl<F: FetchClient, A: Annotator> App<F, A> {
    pub fn new(config: ResolvedConfig, fetcher: F, annotator: A) -> Self {
        Self {
            config,
            fetcher,
            annotator,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn project_names(&self, names: &[ProjectName]) -> Result<Vec<ProjectName>, M2eError> {
        if !names.is_empty() {
            return Ok(names.to_vec());
        }
        all_projects(self.config.projects_dir.as_std_path())
    }

    pub fn prepare_genomics(&self, sink: &dyn ProgressSink) -> Result<GenomicsResult, M2eError> {
        let paths = &self.config.genomics;
        let dir = self.config.genomics_dir.as_std_path();
        fs::create_dir_all(dir).map_err(|err| M2eError::Filesystem(err.to_string()))?;
        let mut items = Vec::new();

        let downloads: [(&str, &str, &Utf8PathBuf, Fetcher); 3] = [
            ("genome", self.config.urls.genome.as_str(), &paths.genome_seq, get_genome),
            ("gff", self.config.urls.gff.as_str(), &paths.genome_complete_gff, get_gff),
            ("cpgs", self.config.urls.cpg.as_str(), &paths.cpgs, get_cpgs),
        ];
        for (artifact, url, target, fetch) in downloads {
            if target.as_std_path().is_file() {
                items.push(item(artifact, "present", target));
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {artifact} from {url}"),
                elapsed: None,
            });
            let start = Instant::now();
            let fetched = fetch(&self.fetcher, url, dir)?;
            move_into_place(&fetched, target.as_std_path())?;
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {artifact} stored at {target}"),
                elapsed: Some(start.elapsed()),
            });
            items.push(item(artifact, "download", target));
        }

        let derive_promoters = !paths.proms_gff.as_std_path().is_file();
        if derive_promoters {
            sink.event(ProgressEvent {
                message: "phase=Annotate; extracting genes and promoters".to_string(),
                elapsed: None,
            });
            self.annotator.filter_genes(
                paths.genome_complete_gff.as_std_path(),
                &self.config.chromosomes,
                paths.genome_genes_gff.as_std_path(),
            )?;
            items.push(item("genes", "derived", &paths.genome_genes_gff));
            self.annotator.promoters(
                paths.genome_genes_gff.as_std_path(),
                self.config.upstream_len,
                paths.proms_gff.as_std_path(),
            )?;
            items.push(item("promoters", "derived", &paths.proms_gff));
        } else {
            items.push(item("promoters", "present", &paths.proms_gff));
        }

        if derive_promoters || !paths.proms_seq.as_std_path().is_file() {
            sink.event(ProgressEvent {
                message: "phase=Annotate; extracting promoter sequences".to_string(),
                elapsed: None,
            });
            self.annotator.extract_sequences(
                paths.proms_gff.as_std_path(),
                paths.genome_seq.as_std_path(),
                paths.proms_seq.as_std_path(),
            )?;
            items.push(item("promoter-sequences", "derived", &paths.proms_seq));
        } else {
            items.push(item("promoter-sequences", "present", &paths.proms_seq));
        }

        Ok(GenomicsResult { items })
    }

    pub fn cases(&self, names: &[ProjectName], sink: &dyn ProgressSink) -> Result<CasesResult, M2eError> {
        let mut projects = Vec::new();
        for name in self.project_names(names)? {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; project {name}"),
                elapsed: None,
            });
            let project = Project::load(&self.config.projects_dir, name)?;
            let cases = project
                .case_ids()
                .map(|case| {
                    Ok(CaseEntry {
                        case: case.clone(),
                        paths: project.resolve(case)?,
                    })
                })
                .collect::<Result<Vec<_>, M2eError>>()?;
            projects.push(ProjectCases {
                project: project.name().clone(),
                cases,
                warnings: project.warnings().to_vec(),
            });
        }
        Ok(CasesResult { projects })
    }

    pub fn build(
        &self,
        names: &[ProjectName],
        genes: &[GeneId],
        cpgs: &[CpgId],
        output: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<(Dataset, BuildSummary), M2eError> {
        let names = self.project_names(names)?;
        let start = Instant::now();
        let (dataset, report) =
            DatasetBuilder::new(&self.config.projects_dir).build(&names, genes, cpgs, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Build; {} rows from {} cases", report.rows, report.cases),
            elapsed: Some(start.elapsed()),
        });

        if let Some(path) = output {
            sink.event(ProgressEvent {
                message: format!("phase=Store; writing {}", path.display()),
                elapsed: None,
            });
            dataset.write_tsv(path)?;
        }

        let summary = BuildSummary {
            report,
            genes: genes.len(),
            cpgs: cpgs.len(),
            output: output.map(|path| path.display().to_string()),
            built_at: iso_timestamp(),
            tool: format!("m2e/{}", env!("CARGO_PKG_VERSION")),
        };
        Ok((dataset, summary))
    }

    pub fn split(
        &self,
        names: &[ProjectName],
        test_projects: Option<usize>,
        sink: &dyn ProgressSink,
    ) -> Result<TrainTestSplit, M2eError> {
        let names = self.project_names(names)?;
        sink.event(ProgressEvent {
            message: format!("phase=Split; ranking {} projects", names.len()),
            elapsed: None,
        });
        let projects = DatasetBuilder::new(&self.config.projects_dir).load_projects(&names)?;
        let assignments = projects_cases(&projects);
        Ok(split_train_test_cases(
            &assignments,
            test_projects.unwrap_or(self.config.test_projects),
        ))
    }

    pub fn baseline(
        &self,
        names: &[ProjectName],
        genes: &[GeneId],
        cpgs: &[CpgId],
        regressor: &dyn Regressor,
        sink: &dyn ProgressSink,
    ) -> Result<BaselineResult, M2eError> {
        let names = self.project_names(names)?;
        let projects = DatasetBuilder::new(&self.config.projects_dir).load_projects(&names)?;
        let split = split_train_test_cases(&projects_cases(&projects), self.config.test_projects);
        let (dataset, _) = crate::dataset::build_dataset(&projects, genes, cpgs, sink)?;

        let train = dataset.subset_cases(&split.train);
        let test = dataset.subset_cases(&split.test);
        sink.event(ProgressEvent {
            message: format!("phase=Train; {} train rows, {} test rows", train.len(), test.len()),
            elapsed: None,
        });
        let evaluation = train_and_evaluate(regressor, &train, &test)?;
        Ok(BaselineResult { split, evaluation })
    }
}

type Fetcher = fn(&dyn FetchClient, &str, &Path) -> Result<PathBuf, M2eError>;

fn item(artifact: &str, action: &str, path: &Utf8PathBuf) -> GenomicsItem {
    GenomicsItem {
        artifact: artifact.to_string(),
        action: action.to_string(),
        path: path.to_string(),
    }
}

fn move_into_place(from: &Path, to: &Path) -> Result<(), M2eError> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|err| M2eError::Filesystem(err.to_string()))?;
    }
    fs::rename(from, to).map_err(|err| {
        M2eError::Filesystem(format!("move {} -> {}: {err}", from.display(), to.display()))
    })
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
