use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::M2eError;

pub const DEFAULT_CONFIG_FILE: &str = "m2e.json";

pub const DEFAULT_GENOME_URL: &str = "ftp://ftp.ncbi.nlm.nih.gov/refseq/H_sapiens/annotation/GRCh37_latest/refseq_identifiers/GRCh37_latest_genomic.fna.gz";
pub const DEFAULT_GFF_URL: &str = "ftp://ftp.ncbi.nlm.nih.gov/refseq/H_sapiens/annotation/GRCh37_latest/refseq_identifiers/GRCh37_latest_genomic.gff.gz";
pub const DEFAULT_CPG_URL: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?mode=raw&is_datatable=true&acc=GPL13534&id=11288&db=GeoDb_blob92";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub dirs: DirsEntry,
    #[serde(default)]
    pub urls: UrlsEntry,
    #[serde(default)]
    pub names: NamesEntry,
    #[serde(default)]
    pub params: ParamsEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DirsEntry {
    #[serde(default)]
    pub projects: Option<String>,
    #[serde(default)]
    pub genomics: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UrlsEntry {
    #[serde(default)]
    pub genome: Option<String>,
    #[serde(default)]
    pub gff: Option<String>,
    #[serde(default)]
    pub cpg: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NamesEntry {
    #[serde(default)]
    pub genome_seq: Option<String>,
    #[serde(default)]
    pub genome_complete_gff: Option<String>,
    #[serde(default)]
    pub genome_genes_gff: Option<String>,
    #[serde(default)]
    pub proms_gff: Option<String>,
    #[serde(default)]
    pub proms_seq: Option<String>,
    #[serde(default)]
    pub cpgs: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ParamsEntry {
    #[serde(default)]
    pub upstream_len: Option<u64>,
    #[serde(default)]
    pub chromosomes: Option<Vec<String>>,
    #[serde(default)]
    pub test_projects: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GenomicsPaths {
    pub genome_seq: Utf8PathBuf,
    pub genome_complete_gff: Utf8PathBuf,
    pub genome_genes_gff: Utf8PathBuf,
    pub proms_gff: Utf8PathBuf,
    pub proms_seq: Utf8PathBuf,
    pub cpgs: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceUrls {
    pub genome: String,
    pub gff: String,
    pub cpg: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub projects_dir: Utf8PathBuf,
    pub genomics_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub urls: SourceUrls,
    pub genomics: GenomicsPaths,
    pub upstream_len: u64,
    pub chromosomes: Vec<String>,
    pub test_projects: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, M2eError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(M2eError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| M2eError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| M2eError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, M2eError> {
        match Self::resolve(path) {
            Err(M2eError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, M2eError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let projects_dir = Utf8PathBuf::from(config.dirs.projects.unwrap_or_else(|| "projects".to_string()));
        let genomics_dir = Utf8PathBuf::from(config.dirs.genomics.unwrap_or_else(|| "genomics".to_string()));
        let output_dir = Utf8PathBuf::from(config.dirs.output.unwrap_or_else(|| "output".to_string()));

        let urls = SourceUrls {
            genome: config.urls.genome.unwrap_or_else(|| DEFAULT_GENOME_URL.to_string()),
            gff: config.urls.gff.unwrap_or_else(|| DEFAULT_GFF_URL.to_string()),
            cpg: config.urls.cpg.unwrap_or_else(|| DEFAULT_CPG_URL.to_string()),
        };

        let names = config.names;
        let genomics = GenomicsPaths {
            genome_seq: genomics_dir.join(names.genome_seq.unwrap_or_else(|| "GRCh37_latest_genomic.fna".to_string())),
            genome_complete_gff: genomics_dir.join(
                names
                    .genome_complete_gff
                    .unwrap_or_else(|| "GRCh37_latest_genomic.gff".to_string()),
            ),
            genome_genes_gff: genomics_dir.join(names.genome_genes_gff.unwrap_or_else(|| "genes.gff".to_string())),
            proms_gff: genomics_dir.join(names.proms_gff.unwrap_or_else(|| "promoters.gff".to_string())),
            proms_seq: genomics_dir.join(names.proms_seq.unwrap_or_else(|| "promoters.fa".to_string())),
            cpgs: genomics_dir.join(names.cpgs.unwrap_or_else(|| "GPL13534-11288.txt".to_string())),
        };

        let upstream_len = config.params.upstream_len.unwrap_or(1000);
        if upstream_len == 0 {
            return Err(M2eError::ConfigParse("params.upstream_len must be positive".to_string()));
        }
        let chromosomes = config.params.chromosomes.unwrap_or_else(default_chromosomes);
        let test_projects = config.params.test_projects.unwrap_or(DEFAULT_TEST_PROJECTS);

        Ok(ResolvedConfig {
            schema_version,
            projects_dir,
            genomics_dir,
            output_dir,
            urls,
            genomics,
            upstream_len,
            chromosomes,
            test_projects,
        })
    }
}

pub const DEFAULT_TEST_PROJECTS: usize = 17;

/// RefSeq sequence accessions of the GRCh37 primary assembly, chr1..chr22, X, Y.
pub fn default_chromosomes() -> Vec<String> {
    [
        "NC_000001.10",
        "NC_000002.11",
        "NC_000003.11",
        "NC_000004.11",
        "NC_000005.9",
        "NC_000006.11",
        "NC_000007.13",
        "NC_000008.10",
        "NC_000009.11",
        "NC_000010.10",
        "NC_000011.9",
        "NC_000012.11",
        "NC_000013.10",
        "NC_000014.8",
        "NC_000015.9",
        "NC_000016.9",
        "NC_000017.10",
        "NC_000018.9",
        "NC_000019.9",
        "NC_000020.10",
        "NC_000021.8",
        "NC_000022.10",
        "NC_000023.10",
        "NC_000024.9",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}
