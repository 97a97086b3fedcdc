use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use bio::alphabets::dna;
use bio::io::fasta;
use bio::io::gff::{self, GffType};
use bio_types::strand::Strand;
use tracing::info;

use crate::error::M2eError;
use crate::fs_util::write_atomic;

pub const PROMOTER_NAME_PREFIX: &str = "GeneID-chr-start-end-strand";

pub fn read_gff(path: &Path) -> Result<Vec<gff::Record>, M2eError> {
    let file = File::open(path)
        .map_err(|err| M2eError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut reader = gff::Reader::new(BufReader::new(file), GffType::GFF3);
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|err| M2eError::Annotation(format!("{}: {err}", path.display())))?;
        // GFF coordinates are 1-based
        if *record.start() == 0 || record.end() < record.start() {
            return Err(M2eError::Annotation(format!(
                "{}: invalid interval {}:{}-{}",
                path.display(),
                record.seqname(),
                record.start(),
                record.end()
            )));
        }
        records.push(record);
    }
    Ok(records)
}

pub fn write_gff(path: &Path, records: &[gff::Record]) -> Result<(), M2eError> {
    write_atomic(path, |writer| {
        writeln!(writer, "##gff-version 3").map_err(|err| M2eError::Filesystem(err.to_string()))?;
        let mut gff_writer = gff::Writer::new(writer, GffType::GFF3);
        for record in records {
            gff_writer
                .write(record)
                .map_err(|err| M2eError::Filesystem(err.to_string()))?;
        }
        Ok(())
    })
}

fn strand_symbol(record: &gff::Record) -> &'static str {
    match record.strand() {
        Some(Strand::Forward) => "+",
        Some(Strand::Reverse) => "-",
        _ => ".",
    }
}

pub fn gene_id(record: &gff::Record) -> Option<&str> {
    let first = record.attributes().get("Dbxref")?;
    first.rsplit(':').next().filter(|id| !id.is_empty())
}

/// `upstream` bases before the feature on its own strand. `None` when a
/// forward feature starts at position 1.
pub fn five_prime_flank(record: &gff::Record, upstream: u64) -> Option<gff::Record> {
    let (start, end) = (*record.start(), *record.end());
    let (flank_start, flank_end) = match record.strand() {
        Some(Strand::Reverse) => (end + 1, end + upstream),
        _ => (start.saturating_sub(upstream).max(1), start.checked_sub(1)?),
    };
    if flank_end < flank_start {
        return None;
    }
    let mut flank = record.clone();
    *flank.start_mut() = flank_start;
    *flank.end_mut() = flank_end;
    Some(flank)
}

pub trait Annotator {
    fn filter_genes(&self, gff: &Path, chromosomes: &[String], out: &Path) -> Result<usize, M2eError>;
    fn promoters(&self, genes: &Path, upstream: u64, out: &Path) -> Result<usize, M2eError>;
    fn extract_sequences(&self, promoters: &Path, genome: &Path, out: &Path) -> Result<usize, M2eError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GffAnnotator;

impl GffAnnotator {
    pub fn genes(records: Vec<gff::Record>, chromosomes: &[String]) -> Vec<gff::Record> {
        let allowed: HashSet<&str> = chromosomes.iter().map(|chr| chr.as_str()).collect();
        records
            .into_iter()
            .filter(|record| record.feature_type() == "gene" && allowed.contains(record.seqname()))
            .collect()
    }

    pub fn promoter_records(genes: &[gff::Record], upstream: u64) -> Result<Vec<gff::Record>, M2eError> {
        let mut promoters = Vec::with_capacity(genes.len());
        for gene in genes {
            let Some(mut promoter) = five_prime_flank(gene, upstream) else {
                continue;
            };
            let id = gene_id(gene).ok_or_else(|| {
                M2eError::Annotation(format!(
                    "gene at {}:{}-{} has no Dbxref gene id",
                    gene.seqname(),
                    gene.start(),
                    gene.end()
                ))
            })?;
            let name = [
                PROMOTER_NAME_PREFIX,
                id,
                promoter.seqname(),
                &promoter.start().to_string(),
                &promoter.end().to_string(),
                strand_symbol(&promoter),
            ]
            .join(":");
            *promoter.feature_type_mut() = name;
            promoters.push(promoter);
        }
        Ok(promoters)
    }
}

/// FASTA id of an extracted promoter: `<name>::<chr>:<start0>-<end>(<strand>)`.
pub fn sequence_name(promoter: &gff::Record) -> String {
    format!(
        "{}::{}:{}-{}({})",
        promoter.feature_type(),
        promoter.seqname(),
        promoter.start() - 1,
        promoter.end(),
        strand_symbol(promoter)
    )
}

impl Annotator for GffAnnotator {
    fn filter_genes(&self, gff: &Path, chromosomes: &[String], out: &Path) -> Result<usize, M2eError> {
        let genes = Self::genes(read_gff(gff)?, chromosomes);
        write_gff(out, &genes)?;
        info!(genes = genes.len(), path = %out.display(), "extracted genes");
        Ok(genes.len())
    }

    fn promoters(&self, genes: &Path, upstream: u64, out: &Path) -> Result<usize, M2eError> {
        let promoters = Self::promoter_records(&read_gff(genes)?, upstream)?;
        write_gff(out, &promoters)?;
        info!(promoters = promoters.len(), path = %out.display(), "extracted promoters");
        Ok(promoters.len())
    }

    fn extract_sequences(&self, promoters: &Path, genome: &Path, out: &Path) -> Result<usize, M2eError> {
        let promoters = read_gff(promoters)?;
        let mut by_seqid: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, promoter) in promoters.iter().enumerate() {
            by_seqid.entry(promoter.seqname()).or_default().push(idx);
        }

        let reader = fasta::Reader::from_file(genome)
            .map_err(|err| M2eError::Filesystem(format!("open {}: {err}", genome.display())))?;
        let mut sequences: Vec<Option<Vec<u8>>> = vec![None; promoters.len()];
        for record in reader.records() {
            let record = record.map_err(|err| M2eError::Annotation(err.to_string()))?;
            let Some(features) = by_seqid.get(record.id()) else {
                continue;
            };
            let seq = record.seq();
            for &idx in features {
                let promoter = &promoters[idx];
                let start = (*promoter.start() - 1) as usize;
                let end = (*promoter.end() as usize).min(seq.len());
                if start >= end {
                    continue;
                }
                let slice = &seq[start..end];
                sequences[idx] = Some(match promoter.strand() {
                    Some(Strand::Reverse) => dna::revcomp(slice),
                    _ => slice.to_vec(),
                });
            }
        }

        let mut written = 0usize;
        write_atomic(out, |writer| {
            let mut fasta_writer = fasta::Writer::new(writer);
            for (promoter, seq) in promoters.iter().zip(&sequences) {
                let Some(seq) = seq else {
                    continue;
                };
                fasta_writer
                    .write(&sequence_name(promoter), None, seq)
                    .map_err(|err| M2eError::Filesystem(err.to_string()))?;
                written += 1;
            }
            fasta_writer
                .flush()
                .map_err(|err| M2eError::Filesystem(err.to_string()))
        })?;
        info!(sequences = written, path = %out.display(), "extracted promoter sequences");
        Ok(written)
    }
}
