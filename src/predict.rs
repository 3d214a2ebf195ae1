//! Windowed BGC probability prediction over a contig's feature matrix.
//!
//! The matrix is flattened into a stream of domain tokens: each annotated
//! gene contributes its present columns in ascending order, genes in
//! registry order. Runs of identical consecutive tokens are collapsed to
//! one representative (which remembers every gene it stands for), the
//! stream is cut into fixed-length windows for the scorer, and the token
//! scores are projected back onto genes:
//!
//! 1. every gene of a collapsed run receives the representative's score;
//! 2. a gene holding several scores combines them with a collapse function
//!    (maximum by default);
//! 3. genes without tokens are linearly interpolated between the nearest
//!    scored genes on either side. Genes before the first or after the last
//!    scored gene stay at 0.
//!
//! The result always has exactly one value per gene, never per padded row.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::artifacts::WindowScorer;
use crate::error::EmeraldError;
use crate::matrix::FeatureMatrix;

/// Value used to fill the tail of the last window
pub const PAD_TOKEN: u32 = 0;

/// Combines the scores a single gene received
pub type CollapseFn = fn(&[f64]) -> f64;

pub fn collapse_max(scores: &[f64]) -> f64 {
    scores.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// A domain token standing for one or more consecutive occurrences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub column: u32,
    /// Genes carrying this occurrence; the first is the representative
    pub genes: Vec<usize>,
}

/// Flatten a matrix into tokens, collapsing consecutive repeats
pub fn compress(matrix: &FeatureMatrix) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();

    for (gene, row) in matrix.gene_rows().iter().enumerate() {
        for &column in row {
            match tokens.last_mut() {
                Some(last) if last.column == column => {
                    if last.genes.last() != Some(&gene) {
                        last.genes.push(gene);
                    }
                }
                _ => tokens.push(Token {
                    column,
                    genes: vec![gene],
                }),
            }
        }
    }

    tokens
}

/// Cut tokens into windows of `block` columns, padding the last one
pub fn windows(tokens: &[Token], block: usize) -> Vec<Vec<u32>> {
    tokens
        .chunks(block)
        .map(|chunk| {
            let mut window: Vec<u32> = chunk.iter().map(|t| t.column).collect();
            window.resize(block, PAD_TOKEN);
            window
        })
        .collect()
}

/// Per-gene BGC probability for one contig.
///
/// `block_size` is the scorer's window length and must be positive. A
/// contig without annotated genes returns zeros without calling the scorer.
pub fn predict(
    matrix: &FeatureMatrix,
    scorer: &dyn WindowScorer,
    block_size: usize,
    collapse: CollapseFn,
) -> Result<Vec<f64>> {
    if block_size == 0 {
        return Err(
            EmeraldError::InvalidParameter("window block size must be positive".into()).into(),
        );
    }
    let gene_count = matrix.gene_count();
    let tokens = compress(matrix);
    if tokens.is_empty() {
        return Ok(vec![0.0; gene_count]);
    }

    let windows = windows(&tokens, block_size);
    let scores = scorer.score(&windows)?;
    if scores.len() != windows.len() * block_size {
        bail!(
            "scorer returned {} values for {} windows of {}",
            scores.len(),
            windows.len(),
            block_size
        );
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        bail!("scorer returned a non-finite value ({bad})");
    }

    let mut per_gene: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    // zip stops at the last real token; padded positions are dropped
    for (token, &score) in tokens.iter().zip(scores.iter()) {
        for &gene in &token.genes {
            per_gene.entry(gene).or_default().push(score);
        }
    }

    let scored: Vec<(usize, f64)> = per_gene
        .into_iter()
        .map(|(gene, s)| (gene, collapse(&s)))
        .collect();

    Ok(interpolate_gaps(gene_count, &scored))
}

/// Place known scores and linearly fill the gaps between them.
///
/// `scored` must be sorted by index. Positions outside the first..last
/// known index are left at 0.
pub fn interpolate_gaps(len: usize, scored: &[(usize, f64)]) -> Vec<f64> {
    let mut out = vec![0.0; len];
    for &(ix, score) in scored {
        out[ix] = score;
    }

    for pair in scored.windows(2) {
        let (a, sa) = pair[0];
        let (b, sb) = pair[1];
        let span = b - a;
        for k in 1..span {
            out[a + k] = sa + (sb - sa) * k as f64 / span as f64;
        }
    }

    out
}
