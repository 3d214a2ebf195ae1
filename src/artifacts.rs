//! Pretrained artifacts: domain vocabulary, window scorer, class models and
//! the reference cluster set.
//!
//! All artifacts are loaded once and shared read-only by every stage. The
//! scorer and the class models sit behind traits so a different model
//! backend can be plugged in without touching the pipeline.
//!
//! Model directory layout:
//!
//! | file | content |
//! |---|---|
//! | `vocab.txt` | one domain id per line, column = 0-based line number |
//! | `token_scores.tsv` | `domain<TAB>probability` |
//! | `class_models.tsv` | `class<TAB>intercept<TAB>domain:weight,...` |
//! | `references.tsv` | `reference_id<TAB>class<TAB>domain,domain,...` |

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::classify::BgcClass;
use crate::error::EmeraldError;
use crate::input::open_input;

pub const VOCAB_FILE: &str = "vocab.txt";
pub const TOKEN_SCORES_FILE: &str = "token_scores.tsv";
pub const CLASS_MODELS_FILE: &str = "class_models.tsv";
pub const REFERENCES_FILE: &str = "references.tsv";

/// Fixed mapping domain id -> feature column
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    domains: IndexSet<String>,
}

impl Vocabulary {
    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Vocabulary {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut domains = IndexSet::new();
        for line in open_input(path)?.lines() {
            let line = line?;
            let domain = line.trim();
            if domain.is_empty() || domain.starts_with('#') {
                continue;
            }
            domains.insert(domain.to_string());
        }
        Ok(Vocabulary { domains })
    }

    pub fn column(&self, domain: &str) -> Option<u32> {
        self.domains.get_index_of(domain).map(|i| i as u32)
    }

    pub fn domain(&self, column: u32) -> Option<&str> {
        self.domains.get_index(column as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Per-position BGC probability for windows of domain tokens.
///
/// `windows` holds k windows of equal length; the result holds one score
/// per window position, row-major (k * window length values). Calls must
/// not depend on each other.
pub trait WindowScorer: Send + Sync {
    fn score(&self, windows: &[Vec<u32>]) -> Result<Vec<f64>>;
}

/// Positive-class probability for a batch of domain-presence rows.
///
/// Each row lists the vocabulary columns present, ascending.
pub trait ClassModel: Send + Sync {
    fn predict_proba(&self, rows: &[Vec<u32>]) -> Result<Vec<f64>>;
}

/// Scores every token with a fixed per-domain probability
#[derive(Debug, Clone)]
pub struct TokenTableScorer {
    table: Vec<f64>,
}

impl TokenTableScorer {
    pub fn new(table: Vec<f64>) -> Self {
        TokenTableScorer { table }
    }

    pub fn load<P: AsRef<Path>>(path: P, vocab: &Vocabulary) -> Result<Self> {
        let path = path.as_ref();
        let mut table = vec![0.0; vocab.len()];
        for (lineno, line) in open_input(path)?.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (domain, prob) = line.split_once('\t').with_context(|| {
                format!("{}:{}: expected domain<TAB>probability", path.display(), lineno + 1)
            })?;
            let prob: f64 = prob
                .trim()
                .parse()
                .with_context(|| format!("{}:{}: bad probability", path.display(), lineno + 1))?;
            if let Some(col) = vocab.column(domain.trim()) {
                table[col as usize] = prob;
            }
        }
        Ok(TokenTableScorer { table })
    }
}

impl WindowScorer for TokenTableScorer {
    fn score(&self, windows: &[Vec<u32>]) -> Result<Vec<f64>> {
        Ok(windows
            .iter()
            .flat_map(|w| w.iter())
            .map(|&t| self.table.get(t as usize).copied().unwrap_or(0.0))
            .collect())
    }
}

/// Logistic regression over domain presence
#[derive(Debug, Clone, Default)]
pub struct LogisticClassModel {
    pub intercept: f64,
    pub weights: IndexMap<u32, f64>,
}

impl ClassModel for LogisticClassModel {
    fn predict_proba(&self, rows: &[Vec<u32>]) -> Result<Vec<f64>> {
        Ok(rows
            .iter()
            .map(|row| {
                let z = self.intercept
                    + row
                        .iter()
                        .filter_map(|c| self.weights.get(c))
                        .sum::<f64>();
                1.0 / (1.0 + (-z).exp())
            })
            .collect())
    }
}

/// One model per biosynthetic class, in [`BgcClass::ALL`] order
pub struct ClassModels {
    models: Vec<Box<dyn ClassModel>>,
}

impl ClassModels {
    pub fn new(models: IndexMap<BgcClass, Box<dyn ClassModel>>) -> Result<Self> {
        let mut models = models;
        let mut ordered = Vec::with_capacity(BgcClass::ALL.len());
        for class in BgcClass::ALL {
            let model = models.swap_remove(&class).ok_or_else(|| {
                EmeraldError::InvalidParameter(format!("no class model for {class}"))
            })?;
            ordered.push(model);
        }
        Ok(ClassModels { models: ordered })
    }

    pub fn load<P: AsRef<Path>>(path: P, vocab: &Vocabulary) -> Result<Self> {
        let path = path.as_ref();
        let mut models: IndexMap<BgcClass, Box<dyn ClassModel>> = IndexMap::new();

        for (lineno, line) in open_input(path)?.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                anyhow::bail!("{}:{}: expected class<TAB>intercept<TAB>weights", path.display(), lineno + 1);
            }
            let class = BgcClass::from_str(fields[0].trim())?;
            let intercept: f64 = fields[1]
                .trim()
                .parse()
                .with_context(|| format!("{}:{}: bad intercept", path.display(), lineno + 1))?;

            let mut weights = IndexMap::new();
            for pair in fields.get(2).unwrap_or(&"").split(',').filter(|p| !p.is_empty()) {
                let (domain, weight) = pair.rsplit_once(':').with_context(|| {
                    format!("{}:{}: expected domain:weight, got '{pair}'", path.display(), lineno + 1)
                })?;
                let weight: f64 = weight.trim().parse().with_context(|| {
                    format!("{}:{}: bad weight in '{pair}'", path.display(), lineno + 1)
                })?;
                if let Some(col) = vocab.column(domain.trim()) {
                    weights.insert(col, weight);
                }
            }
            models.insert(class, Box::new(LogisticClassModel { intercept, weights }));
        }

        ClassModels::new(models)
    }

    /// Models paired with their class, in class order
    pub fn iter(&self) -> impl Iterator<Item = (BgcClass, &dyn ClassModel)> {
        BgcClass::ALL
            .into_iter()
            .zip(self.models.iter().map(|m| m.as_ref()))
    }
}

/// A characterised cluster used for nearest-neighbour labelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCluster {
    pub id: String,
    pub class: String,
    pub domains: BTreeSet<String>,
}

/// Reference clusters; domains outside the vocabulary are dropped so
/// distances are measured over the same columns as detected clusters
pub fn load_references<P: AsRef<Path>>(
    path: P,
    vocab: &Vocabulary,
) -> Result<Vec<ReferenceCluster>> {
    let path = path.as_ref();
    let mut references = Vec::new();
    for (lineno, line) in open_input(path)?.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            anyhow::bail!("{}:{}: expected id<TAB>class<TAB>domains", path.display(), lineno + 1);
        }
        references.push(ReferenceCluster {
            id: fields[0].trim().to_string(),
            class: fields[1].trim().to_string(),
            domains: fields
                .get(2)
                .unwrap_or(&"")
                .split(',')
                .map(str::trim)
                .filter(|d| vocab.column(d).is_some())
                .map(str::to_string)
                .collect(),
        });
    }
    Ok(references)
}

/// Read-only model state shared by all stages
pub struct Artifacts {
    pub vocab: Vocabulary,
    pub scorer: Box<dyn WindowScorer>,
    pub class_models: ClassModels,
    pub references: Vec<ReferenceCluster>,
}

impl Artifacts {
    /// Load every artifact from a model directory
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let file = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(EmeraldError::FileNotFound(path)).with_context(|| {
                    format!("model artifact '{name}' missing from {}", dir.display())
                });
            }
            Ok(path)
        };

        let vocab = Vocabulary::load(file(VOCAB_FILE)?)?;
        let scorer = TokenTableScorer::load(file(TOKEN_SCORES_FILE)?, &vocab)?;
        let class_models = ClassModels::load(file(CLASS_MODELS_FILE)?, &vocab)?;
        let references = load_references(file(REFERENCES_FILE)?, &vocab)?;

        log::info!(
            "loaded models from {}: {} domains, {} reference clusters",
            dir.display(),
            vocab.len(),
            references.len()
        );

        Ok(Artifacts {
            vocab,
            scorer: Box::new(scorer),
            class_models,
            references,
        })
    }
}
