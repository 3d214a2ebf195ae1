//! Stage orchestration.
//!
//! Inputs are ingested once into a [`ContigRegistry`] and a
//! [`DomainAnnotationIndex`]; every contig then flows independently through
//! matrix building, windowed prediction, cluster definition and class
//! filtering. Contigs run in parallel on the rayon pool. A failing contig
//! is reported and does not stop the others.

use anyhow::Result;
use rayon::prelude::*;
use std::path::PathBuf;

use crate::annotation::{AnnotationSource, DomainAnnotationIndex};
use crate::artifacts::Artifacts;
use crate::classify::{ClusterCall, TypeClassifier};
use crate::clusters::{define_clusters, ClusterMasks};
use crate::error::EmeraldError;
use crate::matrix::FeatureMatrix;
use crate::params::DetectionParams;
use crate::predict::{collapse_max, predict, CollapseFn};
use crate::registry::{Cds, CdsFormat, ContigRegistry};

/// Files produced by the gene predictor and the annotators
#[derive(Debug, Clone, Default)]
pub struct InputFiles {
    pub gene_calls: PathBuf,
    /// Detected from content when not given
    pub gene_format: Option<CdsFormat>,
    pub interpro: Option<PathBuf>,
    pub hmmer: Option<PathBuf>,
}

/// Build the registry and the annotation index from input files
pub fn load_inputs(files: &InputFiles) -> Result<(ContigRegistry, DomainAnnotationIndex)> {
    let mut index = DomainAnnotationIndex::new();
    if let Some(path) = &files.interpro {
        log::info!("transform InterProScan annotations");
        index.ingest_file(AnnotationSource::InterPro, path)?;
    }
    if let Some(path) = &files.hmmer {
        log::info!("transform hmmscan annotations");
        index.ingest_file(AnnotationSource::Hmmer, path)?;
    }

    log::info!("transform gene calls");
    let format = match files.gene_format {
        Some(format) => format,
        None => CdsFormat::detect(&files.gene_calls)?,
    };
    let mut registry = ContigRegistry::new();
    registry.ingest_file(&files.gene_calls, format)?;

    log::info!(
        "{} contig(s), {} gene(s), {} annotated gene(s)",
        registry.len(),
        registry.gene_count(),
        index.len()
    );
    Ok((registry, index))
}

/// Everything computed for one contig
#[derive(Debug, Clone)]
pub struct ContigResult {
    pub contig: String,
    pub genes: Vec<Cds>,
    /// One probability per gene
    pub scores: Vec<f64>,
    pub masks: ClusterMasks,
    /// Runs that survived the class filter, in gene order
    pub clusters: Vec<ClusterCall>,
}

#[derive(Debug)]
pub struct ContigFailure {
    pub contig: String,
    pub error: anyhow::Error,
}

/// Results of a whole run
#[derive(Debug)]
pub struct Detection {
    /// Successful contigs in registry order
    pub contigs: Vec<ContigResult>,
    pub failures: Vec<ContigFailure>,
    pub threshold: f64,
}

impl Detection {
    pub fn cluster_count(&self) -> usize {
        self.contigs.iter().map(|c| c.clusters.len()).sum()
    }
}

pub struct Pipeline<'a> {
    artifacts: &'a Artifacts,
    params: DetectionParams,
    threshold: f64,
    collapse: CollapseFn,
}

impl<'a> Pipeline<'a> {
    /// `threshold` is the resolved cluster probability cutoff
    pub fn new(artifacts: &'a Artifacts, params: DetectionParams, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EmeraldError::InvalidParameter(format!(
                "threshold {threshold} outside [0, 1]"
            ))
            .into());
        }
        if params.block_size == 0 {
            return Err(EmeraldError::InvalidParameter(
                "block size must be positive for windowed prediction".into(),
            )
            .into());
        }
        log::info!("cluster probability threshold: {threshold}");
        log::info!(
            "positive class model threshold: {}",
            params.class_acceptance(threshold)
        );
        Ok(Pipeline {
            artifacts,
            params,
            threshold,
            collapse: collapse_max,
        })
    }

    pub fn with_collapse(mut self, collapse: CollapseFn) -> Self {
        self.collapse = collapse;
        self
    }

    /// Run every stage for one contig
    pub fn run_contig(
        &self,
        contig: &str,
        genes: &[Cds],
        index: &DomainAnnotationIndex,
    ) -> Result<ContigResult> {
        let collaborator = |e: anyhow::Error| EmeraldError::Collaborator {
            contig: contig.to_string(),
            msg: format!("{e:#}"),
        };

        let matrix = FeatureMatrix::build(genes, index, &self.artifacts.vocab, self.params.block_size);

        let scores = predict(
            &matrix,
            self.artifacts.scorer.as_ref(),
            self.params.block_size,
            self.collapse,
        )
        .map_err(collaborator)?;
        debug_assert_eq!(scores.len(), genes.len());

        let mut masks = define_clusters(
            &scores,
            self.threshold,
            self.params.gap_fill,
            self.params.min_run,
            self.params.border_threshold,
        );

        let classifier = TypeClassifier {
            models: &self.artifacts.class_models,
            references: &self.artifacts.references,
            vocab: &self.artifacts.vocab,
            acceptance: self.params.class_acceptance(self.threshold),
        };
        let clusters = classifier
            .classify(&matrix, &mut masks)
            .map_err(collaborator)?;

        log::debug!(
            "{contig}: {} genes, {} cluster(s) kept",
            genes.len(),
            clusters.len()
        );

        Ok(ContigResult {
            contig: contig.to_string(),
            genes: genes.to_vec(),
            scores,
            masks,
            clusters,
        })
    }

    /// Run all contigs; failures are collected per contig
    pub fn run(&self, registry: &ContigRegistry, index: &DomainAnnotationIndex) -> Detection {
        log::info!("predict BGC regions for {} contig(s)", registry.len());
        let contigs: Vec<(&str, &[Cds])> = registry.iter().collect();

        let outcomes: Vec<(String, Result<ContigResult>)> = contigs
            .par_iter()
            .map(|(contig, genes)| (contig.to_string(), self.run_contig(contig, genes, index)))
            .collect();

        let mut detection = Detection {
            contigs: Vec::with_capacity(outcomes.len()),
            failures: Vec::new(),
            threshold: self.threshold,
        };
        for (contig, outcome) in outcomes {
            match outcome {
                Ok(result) => detection.contigs.push(result),
                Err(error) => {
                    log::warn!("contig {contig} failed: {error:#}");
                    detection.failures.push(ContigFailure { contig, error });
                }
            }
        }

        log::info!(
            "{} cluster(s) on {} contig(s), {} contig(s) failed",
            detection.cluster_count(),
            detection.contigs.len(),
            detection.failures.len()
        );
        detection
    }
}
