use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::domain::{CaseId, FileId, Modality, ProjectName};
use crate::error::M2eError;
use crate::metadata::{CaseCatalogue, MetadataTable, ReconcileWarning, reconcile};

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    name: ProjectName,
    root: Utf8PathBuf,
}

impl ProjectLayout {
    pub fn new(projects_dir: &Utf8Path, name: ProjectName) -> Self {
        let root = projects_dir.join(name.as_str());
        Self { name, root }
    }

    pub fn name(&self) -> &ProjectName {
        &self.name
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn metadata_path(&self, modality: Modality) -> Utf8PathBuf {
        self.root.join(format!("{}_{}.csv", self.name, modality))
    }

    pub fn modality_dir(&self, modality: Modality) -> Utf8PathBuf {
        let base = self
            .root
            .join("data")
            .join(modality.as_str())
            .join(self.name.as_str())
            .join("harmonized");
        match modality {
            Modality::Methylation => base
                .join("DNA_Methylation")
                .join("Methylation_Beta_Value"),
            Modality::Expression => base
                .join("Transcriptome_Profiling")
                .join("Gene_Expression_Quantification"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    file_ids: BTreeMap<Modality, BTreeSet<FileId>>,
}

impl SampleIndex {
    pub fn discover(layout: &ProjectLayout) -> Result<Self, M2eError> {
        let mut file_ids = BTreeMap::new();
        for modality in Modality::ALL {
            let dir = layout.modality_dir(modality);
            let entries = fs::read_dir(dir.as_std_path()).map_err(|err| {
                M2eError::Filesystem(format!("{}: list {dir}: {err}", layout.name()))
            })?;
            let mut ids = BTreeSet::new();
            for entry in entries {
                let entry = entry.map_err(|err| M2eError::Filesystem(err.to_string()))?;
                let name = entry.file_name().into_string().map_err(|_| {
                    M2eError::Filesystem(format!("non-utf8 file name in {dir}"))
                })?;
                ids.insert(FileId::new(name.as_str()));
            }
            file_ids.insert(modality, ids);
        }
        Ok(Self { file_ids })
    }

    pub fn file_ids(&self) -> &BTreeMap<Modality, BTreeSet<FileId>> {
        &self.file_ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasePaths {
    pub methylation: Utf8PathBuf,
    pub expression: Utf8PathBuf,
}

impl CasePaths {
    pub fn get(&self, modality: Modality) -> &Utf8Path {
        match modality {
            Modality::Methylation => &self.methylation,
            Modality::Expression => &self.expression,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    layout: ProjectLayout,
    catalogue: CaseCatalogue,
    warnings: Vec<ReconcileWarning>,
}

impl Project {
    pub fn load(projects_dir: &Utf8Path, name: ProjectName) -> Result<Self, M2eError> {
        let layout = ProjectLayout::new(projects_dir, name);
        if !layout.root().as_std_path().is_dir() {
            return Err(M2eError::ProjectNotFound(layout.root().to_string()));
        }

        let samples = SampleIndex::discover(&layout)?;
        let methylation = MetadataTable::load(
            layout.metadata_path(Modality::Methylation).as_std_path(),
            Modality::Methylation,
        )?;
        let expression = MetadataTable::load(
            layout.metadata_path(Modality::Expression).as_std_path(),
            Modality::Expression,
        )?;

        let reconciled = reconcile(layout.name(), &methylation, &expression, samples.file_ids())?;
        info!(
            project = %layout.name(),
            cases = reconciled.catalogue.len(),
            "project loaded"
        );

        Ok(Self {
            layout,
            catalogue: reconciled.catalogue,
            warnings: reconciled.warnings,
        })
    }

    pub fn name(&self) -> &ProjectName {
        self.layout.name()
    }

    pub fn catalogue(&self) -> &CaseCatalogue {
        &self.catalogue
    }

    pub fn case_ids(&self) -> impl Iterator<Item = &CaseId> {
        self.catalogue.case_ids()
    }

    pub fn warnings(&self) -> &[ReconcileWarning] {
        &self.warnings
    }

    pub fn resolve(&self, case: &CaseId) -> Result<CasePaths, M2eError> {
        let record = self.catalogue.get(case).ok_or_else(|| M2eError::CaseNotFound {
            project: self.name().to_string(),
            case: case.to_string(),
        })?;

        let path_for = |modality: Modality| -> Utf8PathBuf {
            let file = record.file(modality);
            self.layout
                .modality_dir(modality)
                .join(file.file_id.as_str())
                .join(&file.file_name)
        };

        Ok(CasePaths {
            methylation: path_for(Modality::Methylation),
            expression: path_for(Modality::Expression),
        })
    }
}
