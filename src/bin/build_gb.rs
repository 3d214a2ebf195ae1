//! emerald_build_gb - GenBank records from a nucleotide FASTA and Prodigal proteins
//!
//! Every Prodigal protein becomes a CDS feature (with `translation` and
//! `protein_id`) on the record of its contig. Contigs are written in the
//! order their first protein appears.

use anyhow::{Context, Result};
use clap::Parser;
use gb_io::seq::{Feature, Location, Seq};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;

use emerald::input::{open_input, LineStats};
use emerald::registry::{contig_of_gene, parse_prodigal_header, ProdigalHeader};

#[derive(Parser)]
#[clap(
    name = "emerald_build_gb",
    about = "Build GenBank files from nucleotide FASTA and Prodigal protein FASTA"
)]
struct Args {
    /// FASTA file with nucleotide sequence(s)
    #[clap(short = 'n', value_name = "FILE")]
    nucleotides: PathBuf,

    /// Prodigal output FASTA with amino acid sequences
    #[clap(short = 'a', value_name = "FILE")]
    proteins: PathBuf,

    /// Output GenBank file
    #[clap(short = 'o', value_name = "FILE")]
    out: PathBuf,
}

/// (header without '>', sequence) pairs in file order
fn read_fasta<R: BufRead>(reader: R) -> Result<Vec<(String, String)>> {
    let mut records: Vec<(String, String)> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            records.push((header.to_string(), String::new()));
        } else if let Some((_, seq)) = records.last_mut() {
            seq.push_str(line.trim());
        }
    }
    Ok(records)
}

fn cds_feature(header: &ProdigalHeader<'_>, residues: &str) -> Feature {
    let range = Location::simple_range(header.start as i64 - 1, header.end as i64);
    let location = if header.strand < 0 {
        Location::Complement(Box::new(range))
    } else {
        range
    };
    Feature {
        kind: gb_io::FeatureKind::from("CDS"),
        location,
        qualifiers: vec![
            ("translation".into(), Some(residues.replace('*', ""))),
            ("protein_id".into(), Some(header.id.to_string())),
        ],
    }
}

fn build_records(
    nucleotides: &[(String, String)],
    proteins: &[(String, String)],
) -> (Vec<Seq>, LineStats) {
    let sequences: HashMap<&str, &str> = nucleotides
        .iter()
        .map(|(header, seq)| {
            let id = header.split_whitespace().next().unwrap_or_default();
            (id, seq.as_str())
        })
        .collect();

    let mut stats = LineStats::default();
    let mut contigs: IndexMap<&str, (Vec<Feature>, u64)> = IndexMap::new();
    for (header, residues) in proteins {
        let line = format!(">{header}");
        let Some(parsed) = parse_prodigal_header(&line) else {
            stats.skipped += 1;
            continue;
        };
        let feature = cds_feature(&parsed, residues);
        let contig = contig_of_gene(parsed.id);
        let contig = &header[..contig.len()];
        let entry = contigs.entry(contig).or_default();
        entry.0.push(feature);
        entry.1 = entry.1.max(parsed.end);
        stats.parsed += 1;
    }

    let records = contigs
        .into_iter()
        .map(|(contig, (features, max_end))| {
            let mut record = Seq::empty();
            record.name = Some(contig.to_string());
            record.accession = Some(contig.to_string());
            record.definition = Some(contig.to_string());
            record.molecule_type = Some("DNA".to_string());
            match sequences.get(contig) {
                Some(seq) if !seq.is_empty() => record.seq = seq.as_bytes().to_vec(),
                _ => {
                    log::warn!("no nucleotide sequence for contig {contig}");
                    record.len = Some(max_end as usize);
                }
            }
            record.features = features;
            record
        })
        .collect();

    (records, stats)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let nucleotides = read_fasta(open_input(&args.nucleotides)?)?;
    let proteins = read_fasta(open_input(&args.proteins)?)?;
    let (records, stats) = build_records(&nucleotides, &proteins);
    stats.report("Prodigal headers", &args.proteins);

    let file = File::create(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    let mut writer = BufWriter::new(file);
    for record in &records {
        gb_io::writer::write(&mut writer, record)?;
    }
    writer.flush()?;

    log::info!(
        "{} record(s), {} CDS written to {}",
        records.len(),
        stats.parsed,
        args.out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use emerald::registry::{Cds, CdsFormat, ContigRegistry};
    use std::io::Cursor;

    const FNA: &str = ">ctg_1 assembled\nACGTACGTAC\nGTACGTACGT\n>ctg_9\nAAAA\n";
    const FAA: &str = "\
>ctg_1_1 # 2 # 7 # 1 # ID=1_1;partial=00\n\
MK*\n\
>ctg_1_2 # 10 # 18 # -1 # ID=1_2;partial=00\n\
MAV\nL*\n\
>orphan_1 # 1 # 300 # 1 # ID=2_1\n\
MSS\n\
>not a prodigal header\n\
M\n";

    #[test]
    fn test_genbank_round_trip() {
        let nucleotides = read_fasta(Cursor::new(FNA)).unwrap();
        let proteins = read_fasta(Cursor::new(FAA)).unwrap();
        let (records, stats) = build_records(&nucleotides, &proteins);
        assert_eq!(stats, LineStats { parsed: 3, skipped: 1 });
        assert_eq!(records.len(), 2);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.gbk");
        let mut out = Vec::new();
        for record in &records {
            gb_io::writer::write(&mut out, record).unwrap();
        }
        std::fs::write(&path, out).unwrap();

        let mut registry = ContigRegistry::new();
        registry.ingest_file(&path, CdsFormat::GenBank).unwrap();
        assert_eq!(
            registry.genes("ctg_1").unwrap(),
            &[
                Cds { id: "ctg_1_1".into(), start: 2, end: 7 },
                Cds { id: "ctg_1_2".into(), start: 10, end: 18 },
            ]
        );
        assert_eq!(
            registry.genes("orphan").unwrap(),
            &[Cds { id: "orphan_1".into(), start: 1, end: 300 }]
        );

        let parsed = gb_io::reader::parse_file(path.to_string_lossy().as_ref()).unwrap();
        assert_eq!(parsed[0].seq.len(), 20);
        let translations: Vec<&str> = parsed[0]
            .features
            .iter()
            .filter_map(|f| f.qualifier_values("translation".into()).next())
            .collect();
        assert_eq!(translations, vec!["MK", "MAVL"]);
        assert!(matches!(parsed[0].features[1].location, Location::Complement(_)));
    }
}
