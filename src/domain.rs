use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::M2eError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Methylation,
    Expression,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Methylation, Modality::Expression];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Methylation => "methylation",
            Modality::Expression => "expression",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(ProjectName);
string_id!(CaseId);
string_id!(FileId);
string_id!(GeneId);
string_id!(CpgId);

impl FromStr for ProjectName {
    type Err = M2eError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains('/')
            && !trimmed.contains('\\')
            && trimmed != "."
            && trimmed != "..";
        if !is_valid {
            return Err(M2eError::InvalidProject(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl CaseId {
    pub const SEGMENTS: usize = 4;

    pub fn from_barcode(barcode: &str) -> Result<Self, M2eError> {
        let trimmed = barcode.trim();
        if trimmed.is_empty() {
            return Err(M2eError::InvalidBarcode(barcode.to_string()));
        }
        let prefix = trimmed
            .split('-')
            .take(Self::SEGMENTS)
            .collect::<Vec<_>>()
            .join("-");
        Ok(Self(prefix))
    }
}

impl FromStr for CaseId {
    type Err = M2eError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_barcode(value)
    }
}

impl FileId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// `ENSG00000000003.13` and `ENSG00000000003` name the same gene.
impl GeneId {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let unversioned = trimmed.split('.').next().unwrap_or(trimmed);
        Self(unversioned.to_string())
    }
}

impl FromStr for GeneId {
    type Err = M2eError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(value))
    }
}

impl CpgId {
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl FromStr for CpgId {
    type Err = M2eError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(value))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn barcode_is_cut_to_sample_level() {
        let case = CaseId::from_barcode("TCGA-2W-A8YY-01A-11D-A37N-05").unwrap();
        assert_eq!(case.as_str(), "TCGA-2W-A8YY-01A");
    }

    #[test]
    fn short_barcode_is_kept() {
        let case: CaseId = "TCGA-2W-A8YY".parse().unwrap();
        assert_eq!(case.as_str(), "TCGA-2W-A8YY");
    }

    #[test]
    fn empty_barcode_is_rejected() {
        let err = CaseId::from_barcode("  ").unwrap_err();
        assert_matches!(err, M2eError::InvalidBarcode(_));
    }

    #[test]
    fn gene_version_is_stripped() {
        assert_eq!(GeneId::new("ENSG00000000003.13").as_str(), "ENSG00000000003");
        assert_eq!(GeneId::new("ENSG00000000005").as_str(), "ENSG00000000005");
    }

    #[test]
    fn project_name_rejects_paths() {
        assert_matches!(
            "../TCGA-UCS".parse::<ProjectName>(),
            Err(M2eError::InvalidProject(_))
        );
        let name: ProjectName = " TCGA-UCS ".parse().unwrap();
        assert_eq!(name.as_str(), "TCGA-UCS");
    }
}
