mod common;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use m2e::app::App;
use m2e::config::{Config, ConfigLoader, ResolvedConfig};
use m2e::domain::ProjectName;
use m2e::error::M2eError;
use m2e::fetch::FetchClient;
use m2e::genomics::{GffAnnotator, PROMOTER_NAME_PREFIX, read_gff};
use m2e::model::MeanRegressor;
use m2e::output::JsonOutput;

use common::{ProjectFixture, Quiet, cpgs, genes};

const GENOME_URL: &str = "https://mirror.test/genome.fna.gz";
const GFF_URL: &str = "https://mirror.test/annotation.gff.gz";
const CPG_URL: &str = "https://mirror.test/table?acc=GPL13534";

const GENOME: &str = ">NC_000001.10 Homo sapiens chromosome 1\nACGTACGTAAGGCCTTACGTACGT\n";
const GFF: &str = "##gff-version 3\n\
NC_000001.10\tBestRefSeq\tgene\t11\t20\t.\t+\t.\tID=gene-A;Dbxref=GeneID:7,HGNC:HGNC:1\n\
NC_000001.10\tBestRefSeq\tmRNA\t11\t20\t.\t+\t.\tID=rna-A;Dbxref=GeneID:7\n\
NC_000001.10\tBestRefSeq\tgene\t5\t8\t.\t-\t.\tID=gene-B;Dbxref=GeneID:9\n\
NT_113878.1\tBestRefSeq\tgene\t5\t8\t.\t+\t.\tID=gene-C;Dbxref=GeneID:11\n";

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Serves canned files by URL and counts requests.
struct MockFetch {
    files: HashMap<&'static str, (&'static str, Vec<u8>)>,
    calls: Mutex<Vec<String>>,
}

impl MockFetch {
    fn new() -> Self {
        let files = HashMap::from([
            (GENOME_URL, ("genome.fna.gz", gzip(GENOME))),
            (GFF_URL, ("annotation.gff.gz", gzip(GFF))),
            (CPG_URL, ("GPL13534-11288.txt", b"ID\tCHR\tMAPINFO\ncg00000029\t16\t53468112\n".to_vec())),
        ]);
        Self {
            files,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FetchClient for MockFetch {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, M2eError> {
        self.calls.lock().unwrap().push(url.to_string());
        let (name, bytes) = self
            .files
            .get(url)
            .ok_or_else(|| M2eError::FetchStatus {
                status: 404,
                message: url.to_string(),
            })?;
        let path = dest_dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        Ok(path)
    }
}

impl FetchClient for &MockFetch {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, M2eError> {
        (*self).download(url, dest_dir)
    }
}

fn config(root: &Path) -> ResolvedConfig {
    let mut config = Config::default();
    config.dirs.projects = Some(root.join("projects").display().to_string());
    config.dirs.genomics = Some(root.join("genomics").display().to_string());
    config.dirs.output = Some(root.join("output").display().to_string());
    config.urls.genome = Some(GENOME_URL.to_string());
    config.urls.gff = Some(GFF_URL.to_string());
    config.urls.cpg = Some(CPG_URL.to_string());
    config.params.upstream_len = Some(4);
    config.params.chromosomes = Some(vec!["NC_000001.10".to_string()]);
    config.params.test_projects = Some(1);
    ConfigLoader::resolve_config(config).unwrap()
}

#[test]
fn prepare_genomics_downloads_and_derives_promoters() {
    let temp = tempfile::tempdir().unwrap();
    let fetch = MockFetch::new();
    let app = App::new(config(temp.path()), &fetch, GffAnnotator);

    let result = app.prepare_genomics(&JsonOutput).unwrap();
    let actions: Vec<(&str, &str)> = result
        .items
        .iter()
        .map(|item| (item.artifact.as_str(), item.action.as_str()))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("genome", "download"),
            ("gff", "download"),
            ("cpgs", "download"),
            ("genes", "derived"),
            ("promoters", "derived"),
            ("promoter-sequences", "derived"),
        ]
    );

    let paths = &app.config().genomics;
    assert!(paths.genome_seq.as_std_path().is_file());
    assert!(paths.cpgs.as_std_path().is_file());
    assert!(!temp.path().join("genomics").join("genome.fna.gz").exists());

    let genes = read_gff(paths.genome_genes_gff.as_std_path()).unwrap();
    assert_eq!(genes.len(), 2);

    let promoters = read_gff(paths.proms_gff.as_std_path()).unwrap();
    assert_eq!(promoters.len(), 2);
    assert_eq!(
        promoters[0].feature_type(),
        format!("{PROMOTER_NAME_PREFIX}:7:NC_000001.10:7:10:+")
    );
    assert_eq!((*promoters[1].start(), *promoters[1].end()), (9, 12));

    let fasta = std::fs::read_to_string(paths.proms_seq.as_std_path()).unwrap();
    let sequences: Vec<&str> = fasta.lines().filter(|line| !line.starts_with('>')).collect();
    assert_eq!(sequences, vec!["GTAA", "CCTT"]);
    assert_eq!(
        fasta.lines().next(),
        Some(format!(">{PROMOTER_NAME_PREFIX}:7:NC_000001.10:7:10:+::NC_000001.10:6-10(+)").as_str())
    );
}

#[test]
fn prepare_genomics_skips_present_artifacts() {
    let temp = tempfile::tempdir().unwrap();
    let fetch = MockFetch::new();
    let app = App::new(config(temp.path()), &fetch, GffAnnotator);
    app.prepare_genomics(&Quiet).unwrap();
    assert_eq!(fetch.calls().len(), 3);

    let result = app.prepare_genomics(&Quiet).unwrap();
    assert_eq!(fetch.calls().len(), 3);
    assert!(result.items.iter().all(|item| item.action == "present"));
}

#[test]
fn failed_download_is_transient() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(temp.path());
    config.urls.gff = "https://mirror.test/missing.gff.gz".to_string();
    let fetch = MockFetch::new();
    let app = App::new(config, &fetch, GffAnnotator);

    let err = app.prepare_genomics(&Quiet).unwrap_err();
    assert_matches!(err, M2eError::FetchStatus { status: 404, .. });
    assert!(err.is_transient());
}

#[test]
fn cases_lists_every_project_directory() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockFetch::new(), GffAnnotator);
    let dir = &app.config().projects_dir;
    ProjectFixture::new(dir, "TCGA-B").case("BB-0001", 1.0).write();
    ProjectFixture::new(dir, "TCGA-A")
        .case("AA-0001", 1.0)
        .case("AA-0002", 1.0)
        .write();

    let result = app.cases(&[], &Quiet).unwrap();
    let listed: Vec<(String, usize)> = result
        .projects
        .iter()
        .map(|project| (project.project.to_string(), project.cases.len()))
        .collect();
    assert_eq!(
        listed,
        vec![("TCGA-A".to_string(), 2), ("TCGA-B".to_string(), 1)]
    );
}

#[test]
fn build_writes_dataset_and_summary() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockFetch::new(), GffAnnotator);
    ProjectFixture::new(&app.config().projects_dir, "TCGA-A")
        .case("AA-0001", 1.0)
        .write();

    let out = temp.path().join("output").join("dataset.tsv");
    let names: Vec<ProjectName> = vec!["TCGA-A".parse().unwrap()];
    let (dataset, summary) = app
        .build(&names, &genes(), &cpgs(), Some(out.as_path()), &Quiet)
        .unwrap();

    assert!(out.is_file());
    assert_eq!(summary.report.rows, dataset.len());
    assert_eq!(summary.genes, 3);
    assert_eq!(summary.cpgs, 2);
    assert!(summary.tool.starts_with("m2e/"));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["rows"], 3);
    assert_eq!(json["projects"][0], "TCGA-A");
}

#[test]
fn baseline_scores_on_held_out_project() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockFetch::new(), GffAnnotator);
    let dir = &app.config().projects_dir;
    ProjectFixture::new(dir, "TCGA-BIG")
        .case("AA-0001", 1.0)
        .case("AA-0002", 3.0)
        .write();
    ProjectFixture::new(dir, "TCGA-SMALL").case("BB-0001", 2.0).write();

    let result = app
        .baseline(&[], &genes(), &cpgs(), &MeanRegressor, &Quiet)
        .unwrap();
    assert_eq!(result.split.test_projects.len(), 1);
    assert_eq!(result.split.test_projects[0].as_str(), "TCGA-SMALL");
    assert_eq!(result.evaluation.train_rows, 6);
    assert_eq!(result.evaluation.test_rows, 3);
    // train mean is 201; test targets are 200, 201, 202
    assert!((result.evaluation.metrics.mae - 2.0 / 3.0).abs() < 1e-9);
}
