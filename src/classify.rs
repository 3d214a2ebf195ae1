//! Biosynthetic class assignment for cluster runs.
//!
//! Every maximal run of the cluster mask is reduced to the union of its
//! genes' domains and scored by one model per class. A run whose best class
//! probability falls below the acceptance cutoff is erased from both the
//! cluster and the border mask; a kept run is labelled with its nearest
//! reference cluster by Jaccard distance.

use anyhow::{bail, Result};
use ordered_float::OrderedFloat;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::artifacts::{ClassModels, ReferenceCluster, Vocabulary};
use crate::clusters::{positive_runs, ClusterMasks};
use crate::error::EmeraldError;
use crate::matrix::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BgcClass {
    Alkaloid,
    Nrp,
    Polyketide,
    Ripp,
    Saccharide,
    Terpene,
    Other,
}

impl BgcClass {
    pub const ALL: [BgcClass; 7] = [
        BgcClass::Alkaloid,
        BgcClass::Nrp,
        BgcClass::Polyketide,
        BgcClass::Ripp,
        BgcClass::Saccharide,
        BgcClass::Terpene,
        BgcClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BgcClass::Alkaloid => "Alkaloid",
            BgcClass::Nrp => "NRP",
            BgcClass::Polyketide => "Polyketide",
            BgcClass::Ripp => "RiPP",
            BgcClass::Saccharide => "Saccharide",
            BgcClass::Terpene => "Terpene",
            BgcClass::Other => "Other",
        }
    }
}

impl fmt::Display for BgcClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BgcClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        BgcClass::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                EmeraldError::InvalidParameter(format!(
                    "unknown class '{s}'. Valid classes: Alkaloid, NRP, Polyketide, RiPP, Saccharide, Terpene, Other"
                ))
                .into()
            })
    }
}

/// Closest reference cluster to a run
#[derive(Debug, Clone, PartialEq)]
pub struct NearestReference {
    pub id: String,
    pub class: String,
    pub distance: f64,
}

/// A cluster run that passed the class filter
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCall {
    pub genes: Range<usize>,
    /// Union of vocabulary columns present in the run
    pub domains: Vec<u32>,
    /// Positive-class probability, indexed like [`BgcClass::ALL`]
    pub class_scores: [f64; 7],
    pub nearest: Option<NearestReference>,
}

impl ClusterCall {
    pub fn best_class(&self) -> BgcClass {
        let (ix, _) = self
            .class_scores
            .iter()
            .enumerate()
            .max_by_key(|&(_, s)| OrderedFloat(*s))
            .unwrap_or((BgcClass::ALL.len() - 1, &0.0));
        BgcClass::ALL[ix]
    }
}

/// `1 - |A ∩ B| / |A ∪ B|`, or 1 when both sets are empty
pub fn jaccard_distance<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    1.0 - shared as f64 / union as f64
}

/// First reference with the smallest distance, in reference order
pub fn nearest_reference(
    domains: &BTreeSet<String>,
    references: &[ReferenceCluster],
) -> Option<NearestReference> {
    references
        .iter()
        .map(|r| (r, jaccard_distance(domains, &r.domains)))
        .min_by_key(|(_, d)| OrderedFloat(*d))
        .map(|(r, distance)| NearestReference {
            id: r.id.clone(),
            class: r.class.clone(),
            distance,
        })
}

/// Shared inputs of the class filter
pub struct TypeClassifier<'a> {
    pub models: &'a ClassModels,
    pub references: &'a [ReferenceCluster],
    pub vocab: &'a Vocabulary,
    /// Minimum best-class probability for a run to survive
    pub acceptance: f64,
}

impl TypeClassifier<'_> {
    /// Classify every run of `masks.cluster`, erasing rejected runs from both masks
    pub fn classify(
        &self,
        matrix: &FeatureMatrix,
        masks: &mut ClusterMasks,
    ) -> Result<Vec<ClusterCall>> {
        let spans = positive_runs(&masks.cluster);
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<Vec<u32>> = spans.iter().map(|s| matrix.union_of(s.clone())).collect();

        let mut scores = vec![[0.0f64; 7]; rows.len()];
        for (nc, (class, model)) in self.models.iter().enumerate() {
            let probs = model.predict_proba(&rows)?;
            if probs.len() != rows.len() {
                bail!(
                    "{class} model returned {} probabilities for {} clusters",
                    probs.len(),
                    rows.len()
                );
            }
            for (row_scores, p) in scores.iter_mut().zip(probs) {
                row_scores[nc] = p;
            }
        }

        let mut calls = Vec::new();
        for ((span, domains), class_scores) in spans.into_iter().zip(rows).zip(scores) {
            let best = class_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if best < self.acceptance {
                log::debug!(
                    "rejecting genes {}..{}: best class probability {best:.3} < {:.3}",
                    span.start,
                    span.end,
                    self.acceptance
                );
                masks.cluster[span.clone()].fill(0);
                masks.border[span].fill(0);
                continue;
            }

            let names: BTreeSet<String> = domains
                .iter()
                .filter_map(|&c| self.vocab.domain(c))
                .map(str::to_string)
                .collect();
            let nearest = nearest_reference(&names, self.references);

            calls.push(ClusterCall {
                genes: span,
                domains,
                class_scores,
                nearest,
            });
        }

        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ClassModel, LogisticClassModel};
    use indexmap::IndexMap;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn reference(id: &str, class: &str, domains: &[&str]) -> ReferenceCluster {
        ReferenceCluster {
            id: id.to_string(),
            class: class.to_string(),
            domains: set(domains),
        }
    }

    /// Every class model answers with `prob` if column 0 is present, else 0.01
    fn models_keyed_on_column_zero(prob: f64) -> ClassModels {
        let logit = (prob / (1.0 - prob)).ln();
        let low = (0.01f64 / 0.99).ln();
        let mut models: IndexMap<BgcClass, Box<dyn ClassModel>> = IndexMap::new();
        for class in BgcClass::ALL {
            let mut weights = IndexMap::new();
            weights.insert(0u32, logit - low);
            models.insert(
                class,
                Box::new(LogisticClassModel {
                    intercept: low,
                    weights,
                }),
            );
        }
        ClassModels::new(models).unwrap()
    }

    #[test]
    fn test_jaccard_distance() {
        assert_eq!(jaccard_distance(&set(&[]), &set(&[])), 1.0);
        assert_eq!(jaccard_distance(&set(&["A"]), &set(&["A"])), 0.0);
        let d = jaccard_distance(&set(&["A", "B"]), &set(&["A", "C"]));
        assert!((d - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(jaccard_distance(&set(&["A"]), &set(&[])), 1.0);
    }

    #[test]
    fn test_nearest_reference_tie_keeps_first() {
        let refs = vec![
            reference("BGC1", "NRP", &["A", "X"]),
            reference("BGC2", "Polyketide", &["A", "Y"]),
            reference("BGC3", "Terpene", &["Z"]),
        ];
        let nearest = nearest_reference(&set(&["A", "B"]), &refs).unwrap();
        assert_eq!(nearest.id, "BGC1");
        assert_eq!(nearest.class, "NRP");
        assert!((nearest.distance - 2.0 / 3.0).abs() < 1e-12);

        assert!(nearest_reference(&set(&["A"]), &[]).is_none());
    }

    #[test]
    fn test_class_names_round_trip() {
        for class in BgcClass::ALL {
            assert_eq!(class.to_string().parse::<BgcClass>().unwrap(), class);
        }
        assert_eq!("ripp".parse::<BgcClass>().unwrap(), BgcClass::Ripp);
        assert!("Lipid".parse::<BgcClass>().is_err());
    }

    #[test]
    fn test_rejected_run_clears_both_masks() {
        let vocab = Vocabulary::from_domains(["KS", "AT", "TE"]);
        let models = models_keyed_on_column_zero(0.9);
        let refs = vec![reference("BGC0000055", "Polyketide", &["KS", "AT"])];

        // genes 0-2 carry KS (accepted), genes 5-6 only TE (rejected)
        let mut matrix = FeatureMatrix::zeros(8, 3, 0);
        matrix.set(0, 0);
        matrix.set(1, 1);
        matrix.set(2, 0);
        matrix.set(5, 2);
        matrix.set(6, 2);

        let mut masks = ClusterMasks {
            cluster: vec![1, 1, 1, 0, 0, 1, 1, 0],
            border: vec![1, 0, 1, 0, 1, 1, 1, 0],
        };
        let classifier = TypeClassifier {
            models: &models,
            references: &refs,
            vocab: &vocab,
            acceptance: 0.5,
        };
        let calls = classifier.classify(&matrix, &mut masks).unwrap();

        assert_eq!(masks.cluster, vec![1, 1, 1, 0, 0, 0, 0, 0]);
        assert_eq!(masks.border, vec![1, 0, 1, 0, 1, 0, 0, 0]);

        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.genes, 0..3);
        assert_eq!(call.domains, vec![0, 1]);
        assert!((call.class_scores[0] - 0.9).abs() < 1e-9);
        let nearest = call.nearest.as_ref().unwrap();
        assert_eq!(nearest.id, "BGC0000055");
        assert_eq!(nearest.distance, 0.0);
    }

    #[test]
    fn test_no_runs_no_model_calls() {
        let vocab = Vocabulary::from_domains(["KS"]);
        let models = models_keyed_on_column_zero(0.9);
        let matrix = FeatureMatrix::zeros(3, 1, 0);
        let mut masks = ClusterMasks {
            cluster: vec![0; 3],
            border: vec![1; 3],
        };
        let classifier = TypeClassifier {
            models: &models,
            references: &[],
            vocab: &vocab,
            acceptance: 0.5,
        };
        assert!(classifier.classify(&matrix, &mut masks).unwrap().is_empty());
        assert_eq!(masks.border, vec![1; 3]);
    }
}
