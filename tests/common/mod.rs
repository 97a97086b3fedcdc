#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use m2e::app::{ProgressEvent, ProgressSink};
use m2e::domain::{CpgId, GeneId, Modality, ProjectName};
use m2e::project::ProjectLayout;

pub const GENES: [&str; 3] = ["ENSG00000000003", "ENSG00000000005", "ENSG00000000419"];
pub const CPGS: [&str; 2] = ["cg00000029", "cg00000108"];

pub fn genes() -> Vec<GeneId> {
    GENES.iter().map(|id| GeneId::new(id)).collect()
}

pub fn cpgs() -> Vec<CpgId> {
    CPGS.iter().map(|id| CpgId::new(id)).collect()
}

pub fn projects_dir(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("projects")).unwrap()
}

/// Sink that drops every event.
pub struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

struct SampleFile {
    file_id: String,
    barcode: String,
    body: String,
}

/// Writes a project in the harmonized download layout: metadata tables plus
/// one directory per file id.
pub struct ProjectFixture {
    layout: ProjectLayout,
    methylation: Vec<SampleFile>,
    expression: Vec<SampleFile>,
    stray: Vec<(Modality, String)>,
}

impl ProjectFixture {
    pub fn new(projects_dir: &Utf8Path, name: &str) -> Self {
        let name: ProjectName = name.parse().unwrap();
        Self {
            layout: ProjectLayout::new(projects_dir, name),
            methylation: Vec::new(),
            expression: Vec::new(),
            stray: Vec::new(),
        }
    }

    /// Adds a case with both modalities. Expression rows carry a version
    /// suffix, as in the downloaded count files. `base` offsets every value.
    pub fn case(self, patient: &str, base: f64) -> Self {
        self.methylation_only(patient, base).expression_only(patient, base)
    }

    pub fn methylation_only(mut self, patient: &str, base: f64) -> Self {
        let mut body = String::from("Composite Element REF\tBeta_value\tChromosome\n");
        for (idx, cpg) in CPGS.iter().enumerate() {
            writeln!(body, "{cpg}\t{}\tchr1", base + idx as f64 / 10.0).unwrap();
        }
        writeln!(body, "cg99999999\tNA\tchr2").unwrap();
        let file_id = format!("meth-{}-{}", patient, self.methylation.len());
        self.methylation.push(SampleFile {
            file_id,
            barcode: barcode(patient, "05"),
            body,
        });
        self
    }

    pub fn expression_only(mut self, patient: &str, base: f64) -> Self {
        let mut body = String::new();
        for (idx, gene) in GENES.iter().enumerate() {
            writeln!(body, "{gene}.{}\t{}", idx + 1, base * 100.0 + idx as f64).unwrap();
        }
        writeln!(body, "ENSG00000999999.1\t0").unwrap();
        writeln!(body, "__no_feature\t12").unwrap();
        let file_id = format!("expr-{}-{}", patient, self.expression.len());
        self.expression.push(SampleFile {
            file_id,
            barcode: barcode(patient, "07"),
            body,
        });
        self
    }

    /// An expression file whose gene list repeats `gene` under another version.
    pub fn expression_with_repeat(mut self, patient: &str, gene: &str) -> Self {
        let mut body = String::new();
        for gene in GENES {
            writeln!(body, "{gene}.1\t5").unwrap();
        }
        writeln!(body, "{gene}.9\t6").unwrap();
        let file_id = format!("expr-{}-{}", patient, self.expression.len());
        self.expression.push(SampleFile {
            file_id,
            barcode: barcode(patient, "07"),
            body,
        });
        self
    }

    /// A file id directory on disk that no metadata row mentions.
    pub fn stray(mut self, modality: Modality, file_id: &str) -> Self {
        self.stray.push((modality, file_id.to_string()));
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn write(self) -> ProjectLayout {
        for (modality, files) in [
            (Modality::Methylation, &self.methylation),
            (Modality::Expression, &self.expression),
        ] {
            let dir = self.layout.modality_dir(modality);
            fs::create_dir_all(&dir).unwrap();
            let mut table = String::from("file_id\tfile_name\tcases\tdata_type\n");
            for file in files {
                let file_name = format!("{}.txt", file.file_id);
                writeln!(table, "{}\t{}\t{}\t{}", file.file_id, file_name, file.barcode, modality).unwrap();
                let file_dir = dir.join(&file.file_id);
                fs::create_dir_all(&file_dir).unwrap();
                fs::write(file_dir.join(&file_name), &file.body).unwrap();
            }
            fs::write(self.layout.metadata_path(modality), table).unwrap();
        }
        for (modality, file_id) in &self.stray {
            fs::create_dir_all(self.layout.modality_dir(*modality).join(file_id)).unwrap();
        }
        self.layout
    }
}

/// Full aliquot barcode; the case id is its first four segments.
pub fn barcode(patient: &str, analyte: &str) -> String {
    format!("TCGA-{patient}-01A-11D-A10{analyte}-{analyte}")
}

pub fn case_id(patient: &str) -> String {
    format!("TCGA-{patient}-01A")
}
