//! Cluster membership from per-gene probabilities
//!
//! The cluster mask is thresholded, then short negative gaps are bridged,
//! then short positive runs are removed, in that order. The border mask
//! uses its own fixed threshold and no smoothing.

use std::ops::Range;

/// A maximal run of equal values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub value: u8,
    pub span: Range<usize>,
}

impl Run {
    pub fn len(&self) -> usize {
        self.span.len()
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }
}

/// Split a mask into maximal runs of equal values
pub fn runs(mask: &[u8]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for (i, &value) in mask.iter().enumerate() {
        match out.last_mut() {
            Some(run) if run.value == value => run.span.end = i + 1,
            _ => out.push(Run {
                value,
                span: i..i + 1,
            }),
        }
    }
    out
}

/// Maximal runs of nonzero positions
pub fn positive_runs(mask: &[u8]) -> Vec<Range<usize>> {
    runs(mask)
        .into_iter()
        .filter(|r| r.value != 0)
        .map(|r| r.span)
        .collect()
}

pub fn threshold(scores: &[f64], cutoff: f64) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s >= cutoff)).collect()
}

/// Flip zero runs of length <= `gap` to one
pub fn fill_gaps(mask: &[u8], gap: usize) -> Vec<u8> {
    let mut out = mask.to_vec();
    for run in runs(mask) {
        if run.value == 0 && run.len() <= gap {
            out[run.span].fill(1);
        }
    }
    out
}

/// Flip nonzero runs of length <= `min_run` to zero
pub fn remove_short_runs(mask: &[u8], min_run: usize) -> Vec<u8> {
    let mut out = mask.to_vec();
    for run in runs(mask) {
        if run.value != 0 && run.len() <= min_run {
            out[run.span].fill(0);
        }
    }
    out
}

/// Cluster and border masks for one contig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMasks {
    pub cluster: Vec<u8>,
    pub border: Vec<u8>,
}

pub fn define_clusters(
    scores: &[f64],
    cutoff: f64,
    gap_fill: usize,
    min_run: usize,
    border_cutoff: f64,
) -> ClusterMasks {
    let cluster = remove_short_runs(&fill_gaps(&threshold(scores, cutoff), gap_fill), min_run);
    let border = threshold(scores, border_cutoff);
    ClusterMasks { cluster, border }
}
