use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::domain::{CpgId, GeneId, ProjectName};
use crate::error::M2eError;

pub const GENE_ID_COLUMN: &str = "Gene stable ID";

pub fn all_projects(projects_dir: &Path) -> Result<Vec<ProjectName>, M2eError> {
    if !projects_dir.is_dir() {
        return Err(M2eError::ProjectNotFound(projects_dir.display().to_string()));
    }
    let mut names = Vec::new();
    let entries = fs::read_dir(projects_dir).map_err(|err| M2eError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| M2eError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if name.starts_with('.') {
                continue;
            }
            names.push(name.parse()?);
        }
    }
    names.sort();
    Ok(names)
}

fn open_table(path: &Path, delimiter: u8) -> Result<csv::Reader<BufReader<File>>, M2eError> {
    let file = File::open(path)
        .map_err(|err| M2eError::Filesystem(format!("open {}: {err}", path.display())))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(BufReader::new(file)))
}

fn column_index(reader: &mut csv::Reader<BufReader<File>>, path: &Path, column: &str) -> Result<usize, M2eError> {
    let headers = reader.headers().map_err(|err| M2eError::DataParse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    headers
        .iter()
        .position(|name| name == column)
        .ok_or_else(|| M2eError::DataParse {
            path: path.display().to_string(),
            message: format!("missing column {column:?}"),
        })
}

pub fn random_genes(lookup: &Path, n: usize, seed: Option<u64>) -> Result<Vec<GeneId>, M2eError> {
    let mut reader = open_table(lookup, b',')?;
    let col = column_index(&mut reader, lookup, GENE_ID_COLUMN)?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| M2eError::DataParse {
            path: lookup.display().to_string(),
            message: err.to_string(),
        })?;
        let Some(value) = record.get(col).map(str::trim).filter(|value| !value.is_empty()) else {
            continue;
        };
        let gene = GeneId::new(value);
        if seen.insert(gene.clone()) {
            ids.push(gene);
        }
    }

    if ids.len() < n {
        return Err(M2eError::Selection(format!(
            "cannot draw {n} genes from {} ({} available)",
            lookup.display(),
            ids.len()
        )));
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok(ids.choose_multiple(&mut rng, n).cloned().collect())
}

#[derive(Debug, Deserialize)]
struct CorrelationRow {
    #[serde(rename = "Meth_Probe")]
    probe: String,
    #[serde(rename = "Corr_Coeff")]
    coefficient: Option<f64>,
}

/// Strongest absolute correlation first; rows without a coefficient rank last.
pub fn top_cpgs(correlations: &Path, n: usize) -> Result<Vec<CpgId>, M2eError> {
    let mut reader = open_table(correlations, b'\t')?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<CorrelationRow>() {
        let row = row.map_err(|err| M2eError::DataParse {
            path: correlations.display().to_string(),
            message: err.to_string(),
        })?;
        rows.push((row.probe, row.coefficient.map(f64::abs).filter(|value| !value.is_nan())));
    }

    rows.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(rows
        .into_iter()
        .take(n)
        .map(|(probe, _)| CpgId::new(&probe))
        .collect())
}
