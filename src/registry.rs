//! Contig/gene registry built from gene-prediction output
//!
//! Gene order within a contig is the order in which the predictor emitted
//! the genes; every downstream stage indexes genes by this position.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use nom::{
    bytes::complete::take_till1,
    character::complete::{char, digit1, space0, space1},
    combinator::{map_res, opt, recognize},
    sequence::{pair, preceded, tuple},
    IResult,
};
use std::io::BufRead;
use std::path::Path;

use crate::error::require_file;
use crate::input::{open_input, LineStats};

/// A predicted coding sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cds {
    pub id: String,
    pub start: u64, // 1-based, inclusive
    pub end: u64,
}

/// Gene-prediction file flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdsFormat {
    /// Prodigal protein FASTA: `>contig_N # start # end # strand # attrs`
    ProdigalFasta,
    /// GenBank records with CDS features
    GenBank,
}

impl CdsFormat {
    /// Pick a format from the first non-blank line of a file
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_input(path)?;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(if line.starts_with('>') {
                CdsFormat::ProdigalFasta
            } else {
                CdsFormat::GenBank
            });
        }
        Ok(CdsFormat::ProdigalFasta)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContigRegistry {
    contigs: IndexMap<String, Vec<Cds>>,
}

impl ContigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a gene to a contig, creating the contig on first use
    pub fn push(&mut self, contig: &str, cds: Cds) {
        if let Some(genes) = self.contigs.get_mut(contig) {
            genes.push(cds);
        } else {
            self.contigs.insert(contig.to_string(), vec![cds]);
        }
    }

    /// Register a contig that may end up without genes
    pub fn ensure_contig(&mut self, contig: &str) {
        if !self.contigs.contains_key(contig) {
            self.contigs.insert(contig.to_string(), Vec::new());
        }
    }

    pub fn genes(&self, contig: &str) -> Option<&[Cds]> {
        self.contigs.get(contig).map(|v| v.as_slice())
    }

    /// Contigs in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Cds])> {
        self.contigs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn gene_count(&self) -> usize {
        self.contigs.values().map(Vec::len).sum()
    }

    pub fn ingest_file<P: AsRef<Path>>(&mut self, path: P, format: CdsFormat) -> Result<LineStats> {
        let path = path.as_ref();
        require_file(path)?;
        let stats = match format {
            CdsFormat::ProdigalFasta => self.ingest_prodigal(open_input(path)?)?,
            CdsFormat::GenBank => self.ingest_genbank(path)?,
        };
        stats.report("gene calls", path);
        Ok(stats)
    }

    /// Read gene coordinates from Prodigal FASTA headers
    pub fn ingest_prodigal<R: BufRead>(&mut self, reader: R) -> Result<LineStats> {
        let mut stats = LineStats::default();

        for line in reader.lines() {
            let line = line?;
            if !line.starts_with('>') {
                continue;
            }
            match parse_prodigal_header(&line) {
                Some(ProdigalHeader { id, start, end, .. }) => {
                    let contig = contig_of_gene(id);
                    self.push(
                        contig,
                        Cds {
                            id: id.to_string(),
                            start,
                            end,
                        },
                    );
                    stats.parsed += 1;
                }
                None => stats.skipped += 1,
            }
        }

        Ok(stats)
    }

    /// Read CDS features from GenBank records.
    ///
    /// Starts are converted from 0-based to 1-based; ends are kept as given
    /// by the exclusive-end location, which equals the 1-based inclusive end.
    pub fn ingest_genbank<P: AsRef<Path>>(&mut self, path: P) -> Result<LineStats> {
        let path = path.as_ref();
        let records = gb_io::reader::parse_file(path.to_string_lossy().as_ref())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Could not parse GenBank file {}", path.display()))?;

        let mut stats = LineStats::default();
        for (record_idx, seq) in records.iter().enumerate() {
            let contig = record_id(seq, record_idx);
            self.ensure_contig(&contig);

            for feature in &seq.features {
                if feature.kind.to_string() != "CDS" {
                    continue;
                }
                let Ok((from, to)) = feature.location.find_bounds() else {
                    stats.skipped += 1;
                    continue;
                };
                let id = first_qualifier(feature, "protein_id")
                    .or_else(|| first_qualifier(feature, "locus_tag"));
                let Some(id) = id else {
                    stats.skipped += 1;
                    continue;
                };
                if from < 0 || to < from {
                    stats.skipped += 1;
                    continue;
                }

                self.push(
                    &contig,
                    Cds {
                        id,
                        start: from as u64 + 1,
                        end: to as u64,
                    },
                );
                stats.parsed += 1;
            }
        }

        Ok(stats)
    }
}

/// Contig id of a Prodigal gene: the gene id minus its trailing `_<index>`
pub fn contig_of_gene(gene: &str) -> &str {
    match gene.rsplit_once('_') {
        Some((contig, _)) => contig,
        None => "",
    }
}

fn separator(input: &str) -> IResult<&str, ()> {
    let (input, _) = tuple((space1, char('#'), space0))(input)?;
    Ok((input, ()))
}

fn coordinate(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

fn strand_field(input: &str) -> IResult<&str, i8> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| s.parse::<i8>())(input)
}

fn prodigal_header(input: &str) -> IResult<&str, ProdigalHeader<'_>> {
    let (input, _) = char('>')(input)?;
    let (input, id) = take_till1(|c: char| c.is_whitespace())(input)?;
    let (input, _) = separator(input)?;
    let (input, start) = coordinate(input)?;
    let (input, _) = separator(input)?;
    let (input, end) = coordinate(input)?;
    let (input, strand) = opt(preceded(separator, strand_field))(input)?;
    Ok((
        input,
        ProdigalHeader {
            id,
            start,
            end,
            strand: strand.unwrap_or(1),
        },
    ))
}

/// Fields of a Prodigal protein FASTA header line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProdigalHeader<'a> {
    pub id: &'a str,
    pub start: u64, // 1-based, inclusive
    pub end: u64,
    /// 1 or -1; 1 when the header carries no strand
    pub strand: i8,
}

/// Parse `>id # start # end # strand # attrs`; `None` for anything else
pub fn parse_prodigal_header(line: &str) -> Option<ProdigalHeader<'_>> {
    prodigal_header(line).ok().map(|(_, header)| header)
}

pub(crate) fn first_qualifier(feature: &gb_io::seq::Feature, key: &str) -> Option<String> {
    feature
        .qualifier_values(key.into())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn record_id(seq: &gb_io::seq::Seq, record_idx: usize) -> String {
    let non_empty = |v: &Option<String>| {
        v.as_ref()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    non_empty(&seq.version)
        .or_else(|| non_empty(&seq.accession))
        .or_else(|| non_empty(&seq.name))
        .unwrap_or_else(|| format!("record_{}", record_idx + 1))
}
