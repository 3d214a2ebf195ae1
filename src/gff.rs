//! GFF3 report of detected clusters

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::classify::ClusterCall;
use crate::clusters::positive_runs;
use crate::pipeline::{ContigResult, Detection};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy)]
pub struct GffOptions {
    /// Skip the per-gene CDS lines
    pub minimal: bool,
    /// Emit CLUSTER_border lines inside each cluster
    pub refined_borders: bool,
}

impl Default for GffOptions {
    fn default() -> Self {
        GffOptions {
            minimal: true,
            refined_borders: true,
        }
    }
}

struct GffLine {
    contig: String,
    start: u64,
    kind: &'static str,
    text: String,
}

impl GffLine {
    /// CDS lines sort after cluster lines at the same start
    fn kind_key(&self) -> &str {
        if self.kind == "CDS" {
            "Z"
        } else {
            self.kind
        }
    }
}

fn cluster_attributes(call: &ClusterCall) -> String {
    match &call.nearest {
        Some(n) => format!(
            "nearest_MiBIG={};nearest_MiBIG_class={};nearest_MiBIG_jaccardDistance={:.3}",
            n.id, n.class, n.distance
        ),
        None => format!("best_class={}", call.best_class()),
    }
}

fn contig_lines(result: &ContigResult, options: &GffOptions, lines: &mut Vec<GffLine>) {
    let source = format!("EMERALDv{VERSION}");
    let contig = &result.contig;
    let last_gene = result.genes.len().saturating_sub(1);

    if !options.minimal {
        for (cds, score) in result.genes.iter().zip(&result.scores) {
            lines.push(GffLine {
                contig: contig.clone(),
                start: cds.start,
                kind: "CDS",
                text: format!(
                    "{contig}\t{source}\tCDS\t{}\t{}\t.\t.\t.\tID={};emerald_probability={score:.3}",
                    cds.start, cds.end, cds.id
                ),
            });
        }
    }

    for (n, call) in result.clusters.iter().enumerate() {
        let span = &call.genes;
        let id = format!("{contig}_emrld_{}", n + 1);
        let attrs = cluster_attributes(call);
        let partial = format!(
            "{}{}",
            u8::from(span.start == 0),
            u8::from(span.end - 1 == last_gene)
        );
        let start = result.genes[span.start].start;
        let end = result.genes[span.end - 1].end;

        lines.push(GffLine {
            contig: contig.clone(),
            start,
            kind: "CLUSTER",
            text: format!(
                "{contig}\t{source}\tCLUSTER\t{start}\t{end}\t.\t.\t.\tID={id};{attrs};partial={partial}"
            ),
        });

        if options.refined_borders {
            let border = &result.masks.border[span.clone()];
            for (m, sub) in positive_runs(border).into_iter().enumerate() {
                let start = result.genes[span.start + sub.start].start;
                let end = result.genes[span.start + sub.end - 1].end;
                lines.push(GffLine {
                    contig: contig.clone(),
                    start,
                    kind: "CLUSTER_border",
                    text: format!(
                        "{contig}\t{source}\tCLUSTER_border\t{start}\t{end}\t.\t.\t.\tID={id}_{};{attrs};partial={partial}",
                        m + 1
                    ),
                });
            }
        }
    }
}

/// Write a detection as GFF3
pub fn write_gff<W: Write>(writer: &mut W, detection: &Detection, options: &GffOptions) -> Result<()> {
    let mut lines = Vec::new();
    for result in &detection.contigs {
        contig_lines(result, options, &mut lines);
    }
    lines.sort_by(|a, b| {
        (a.contig.as_str(), a.start, a.kind_key()).cmp(&(b.contig.as_str(), b.start, b.kind_key()))
    });

    writeln!(writer, "##gff-version 3")?;
    for line in &lines {
        writeln!(writer, "{}", line.text)?;
    }
    Ok(())
}

pub fn write_gff_file<P: AsRef<Path>>(path: P, detection: &Detection, options: &GffOptions) -> Result<()> {
    let path = path.as_ref();
    log::info!("Writing output to file {}", path.display());
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_gff(&mut writer, detection, options)?;
    writer.flush()?;
    Ok(())
}
