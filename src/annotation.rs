//! Domain-annotation index: gene id -> domain ids.
//!
//! Two annotation sources feed the index:
//!
//! * InterProScan 5 output, either the TSV report (`-f TSV`) or the GFF3
//!   report (`-f GFF3`). The format is sniffed from the first line.
//! * hmmscan `--domtblout` tables (HMMER 3.x).
//!
//! TSV schema (InterProScan 5.x, tab separated, 0-based columns):
//! `0` protein accession, `4` signature accession, `11` InterPro
//! accession when the lookup ran (`-` or absent otherwise). The InterPro
//! accession is preferred; the signature accession is the fallback.
//!
//! GFF3 schema: only `protein_match` features are used. The domain id is
//! the `InterPro:` cross reference when present, else the `Name=` value.
//! Everything after `##FASTA` is ignored.
//!
//! domtblout schema (whitespace separated): column `0` target name (the
//! profile, used as domain id), column `3` query name (the gene).
//!
//! Lines that cannot be split into the required columns are skipped and
//! counted; nothing is validated beyond that.

use anyhow::Result;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::input::{open_input, LineStats};

/// Which external annotator produced a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationSource {
    InterPro,
    Hmmer,
}

/// Concrete line format, resolved once per file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    InterProTsv,
    InterProGff,
    HmmerDomTable,
}

impl AnnotationFormat {
    pub fn sniff(source: AnnotationSource, first_line: &str) -> Self {
        match source {
            AnnotationSource::Hmmer => AnnotationFormat::HmmerDomTable,
            AnnotationSource::InterPro if first_line.starts_with("##gff") => {
                AnnotationFormat::InterProGff
            }
            AnnotationSource::InterPro => AnnotationFormat::InterProTsv,
        }
    }
}

/// Outcome of parsing one line
#[derive(Debug, PartialEq, Eq)]
enum Parsed<'a> {
    Hit { gene: &'a str, domain: &'a str },
    Ignored,
    Malformed,
    EndOfRecords,
}

#[derive(Debug, Default, Clone)]
pub struct DomainAnnotationIndex {
    entries: HashMap<String, Vec<String>>,
}

impl DomainAnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one (gene, domain) pair; duplicates are kept
    pub fn insert(&mut self, gene: &str, domain: &str) {
        self.entries
            .entry(gene.to_string())
            .or_default()
            .push(domain.to_string());
    }

    pub fn domains(&self, gene: &str) -> Option<&[String]> {
        self.entries.get(gene).map(|v| v.as_slice())
    }

    /// Number of annotated genes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ingest an annotation file. Missing files fail with `FileNotFound`.
    pub fn ingest_file<P: AsRef<Path>>(
        &mut self,
        source: AnnotationSource,
        path: P,
    ) -> Result<LineStats> {
        let path = path.as_ref();
        log::info!("processing {}", path.display());
        let reader = open_input(path)?;
        let stats = self.ingest(source, reader)?;
        stats.report("domain annotations", path);
        Ok(stats)
    }

    /// Ingest annotation lines from any reader
    pub fn ingest<R: BufRead>(&mut self, source: AnnotationSource, reader: R) -> Result<LineStats> {
        let mut stats = LineStats::default();
        let mut detected = None;

        for line in reader.lines() {
            let line = line?;
            let format = *detected.get_or_insert_with(|| AnnotationFormat::sniff(source, &line));

            let parsed = match format {
                AnnotationFormat::InterProTsv => parse_interpro_tsv(&line),
                AnnotationFormat::InterProGff => parse_interpro_gff(&line),
                AnnotationFormat::HmmerDomTable => parse_domtbl(&line),
            };

            match parsed {
                Parsed::Hit { gene, domain } => {
                    self.insert(gene, domain);
                    stats.parsed += 1;
                }
                Parsed::Ignored => {}
                Parsed::Malformed => stats.skipped += 1,
                Parsed::EndOfRecords => break,
            }
        }

        Ok(stats)
    }
}

fn parse_interpro_tsv(line: &str) -> Parsed<'_> {
    if line.trim().is_empty() {
        return Parsed::Ignored;
    }
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() < 5 || fields[0].is_empty() {
        return Parsed::Malformed;
    }

    let domain = match fields.get(11).map(|s| s.trim()) {
        Some(ipr) if !ipr.is_empty() && ipr != "-" => ipr,
        _ => fields[4].trim(),
    };
    if domain.is_empty() || domain == "-" {
        return Parsed::Malformed;
    }

    Parsed::Hit {
        gene: fields[0],
        domain,
    }
}

fn parse_interpro_gff(line: &str) -> Parsed<'_> {
    if line.starts_with("##FASTA") {
        return Parsed::EndOfRecords;
    }
    if line.starts_with('#') || line.trim().is_empty() {
        return Parsed::Ignored;
    }

    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() < 9 {
        return Parsed::Malformed;
    }
    if fields[2] != "protein_match" {
        return Parsed::Ignored;
    }

    let attributes = fields[fields.len() - 1];
    let domain = match attributes.split_once("InterPro:") {
        Some((_, rest)) => rest.split(['"', ',', ';']).next(),
        None => attributes
            .split(';')
            .find_map(|kv| kv.trim().strip_prefix("Name=")),
    };

    match domain.map(str::trim) {
        Some(domain) if !domain.is_empty() => Parsed::Hit {
            gene: fields[0],
            domain,
        },
        _ => Parsed::Malformed,
    }
}

fn parse_domtbl(line: &str) -> Parsed<'_> {
    if line.starts_with('#') || line.trim().is_empty() {
        return Parsed::Ignored;
    }
    let fields: Vec<&str> = line.split_whitespace().take(4).collect();
    if fields.len() < 4 {
        return Parsed::Malformed;
    }
    Parsed::Hit {
        gene: fields[3],
        domain: fields[0],
    }
}
