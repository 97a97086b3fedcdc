use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use tracing::debug;

use crate::domain::{CaseId, CpgId, GeneId};
use crate::error::M2eError;
use crate::project::Project;

pub const BETA_VALUE_COLUMN: &str = "Beta_value";

#[derive(Debug, Clone, PartialEq)]
pub struct Readings<K> {
    ids: Vec<K>,
    values: Vec<f64>,
}

impl<K: Clone + Eq + Hash> Readings<K> {
    pub fn new(ids: Vec<K>, values: Vec<f64>) -> Self {
        debug_assert_eq!(ids.len(), values.len());
        Self { ids, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ids(&self) -> &[K] {
        &self.ids
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.ids.iter().zip(self.values.iter().copied())
    }

    pub fn select<F>(&self, wanted: &[K], missing: F) -> Result<Self, M2eError>
    where
        F: Fn(&K) -> M2eError,
    {
        let mut positions = HashMap::<&K, Vec<usize>>::with_capacity(self.ids.len());
        for (idx, id) in self.ids.iter().enumerate() {
            positions.entry(id).or_default().push(idx);
        }

        let mut ids = Vec::with_capacity(wanted.len());
        let mut values = Vec::with_capacity(wanted.len());
        for id in wanted {
            let rows = positions.get(id).ok_or_else(|| missing(id))?;
            for &row in rows {
                ids.push(self.ids[row].clone());
                values.push(self.values[row]);
            }
        }
        Ok(Self { ids, values })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub genes: Option<&'a [GeneId]>,
    pub cpgs: Option<&'a [CpgId]>,
    pub want_expression: bool,
    pub want_methylation: bool,
}

impl<'a> LoadRequest<'a> {
    pub fn both(genes: Option<&'a [GeneId]>, cpgs: Option<&'a [CpgId]>) -> Self {
        Self {
            genes,
            cpgs,
            want_expression: true,
            want_methylation: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaseData {
    pub expression: Option<Readings<GeneId>>,
    pub methylation: Option<Readings<CpgId>>,
}

pub struct CaseDataLoader<'p> {
    project: &'p Project,
}

impl<'p> CaseDataLoader<'p> {
    pub fn new(project: &'p Project) -> Self {
        Self { project }
    }

    pub fn load(&self, case: &CaseId, request: LoadRequest<'_>) -> Result<CaseData, M2eError> {
        let paths = self.project.resolve(case)?;
        debug!(project = %self.project.name(), case = %case, "loading case data");

        let expression = if request.want_expression {
            let all = read_expression(&paths.expression)?;
            Some(match request.genes {
                Some(genes) => all.select(genes, |gene| M2eError::GeneNotFound {
                    case: case.to_string(),
                    gene: gene.to_string(),
                })?,
                None => all,
            })
        } else {
            None
        };

        let methylation = if request.want_methylation {
            let all = read_methylation(&paths.methylation)?;
            Some(match request.cpgs {
                Some(cpgs) => all.select(cpgs, |cpg| M2eError::CpgNotFound {
                    case: case.to_string(),
                    cpg: cpg.to_string(),
                })?,
                None => all,
            })
        } else {
            None
        };

        Ok(CaseData {
            expression,
            methylation,
        })
    }
}

fn open(path: &Utf8Path) -> Result<Box<dyn Read>, M2eError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| M2eError::Filesystem(format!("open {path}: {err}")))?;
    if path.extension() == Some("gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(BufReader::new(file)))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn read_expression(path: &Utf8Path) -> Result<Readings<GeneId>, M2eError> {
    parse_expression(open(path)?, path.as_str())
}

pub fn read_methylation(path: &Utf8Path) -> Result<Readings<CpgId>, M2eError> {
    parse_methylation(open(path)?, path.as_str())
}

pub fn parse_expression<R: Read>(reader: R, source: &str) -> Result<Readings<GeneId>, M2eError> {
    let parse_err = |message: String| M2eError::DataParse {
        path: source.to_string(),
        message,
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|err| parse_err(err.to_string()))?;
        let (Some(id), Some(value)) = (record.get(0), record.get(1)) else {
            return Err(parse_err(format!("line {}: expected id and value", line + 1)));
        };
        ids.push(GeneId::new(id));
        values.push(parse_value(value).map_err(|message| parse_err(format!("line {}: {message}", line + 1)))?);
    }
    Ok(Readings::new(ids, values))
}

pub fn parse_methylation<R: Read>(reader: R, source: &str) -> Result<Readings<CpgId>, M2eError> {
    let parse_err = |message: String| M2eError::DataParse {
        path: source.to_string(),
        message,
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|err| parse_err(err.to_string()))?
        .clone();
    let beta_col = headers
        .iter()
        .position(|name| name == BETA_VALUE_COLUMN)
        .filter(|&idx| idx > 0)
        .ok_or_else(|| parse_err(format!("missing {BETA_VALUE_COLUMN} column")))?;

    let mut ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|err| parse_err(err.to_string()))?;
        let (Some(id), Some(value)) = (record.get(0), record.get(beta_col)) else {
            return Err(parse_err(format!("line {}: row too short", line + 2)));
        };
        ids.push(CpgId::new(id));
        values.push(parse_value(value).map_err(|message| parse_err(format!("line {}: {message}", line + 2)))?);
    }
    Ok(Readings::new(ids, values))
}

/// Missing measurements (`NA`, empty) become NaN.
fn parse_value(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    trimmed
        .parse::<f64>()
        .map_err(|err| format!("invalid value {trimmed:?}: {err}"))
}
