//! Binary gene x domain feature matrix, one per contig

use crate::annotation::DomainAnnotationIndex;
use crate::artifacts::Vocabulary;
use crate::registry::Cds;

/// Sparse presence matrix.
///
/// Rows past `gene_count` are zero padding up to a multiple of the block
/// size. Each row stores its present columns in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMatrix {
    rows: Vec<Vec<u32>>,
    n_cols: usize,
    gene_count: usize,
}

impl FeatureMatrix {
    pub fn zeros(gene_count: usize, n_cols: usize, block_size: usize) -> Self {
        FeatureMatrix {
            rows: vec![Vec::new(); padded_rows(gene_count, block_size)],
            n_cols,
            gene_count,
        }
    }

    /// Build the matrix for one contig's genes
    pub fn build(
        genes: &[Cds],
        index: &DomainAnnotationIndex,
        vocab: &Vocabulary,
        block_size: usize,
    ) -> Self {
        let mut matrix = Self::zeros(genes.len(), vocab.len(), block_size);

        for (ix, cds) in genes.iter().enumerate() {
            let Some(domains) = index.domains(&cds.id) else {
                continue;
            };
            let row = &mut matrix.rows[ix];
            row.extend(domains.iter().filter_map(|d| vocab.column(d)));
            row.sort_unstable();
            row.dedup();
        }

        matrix
    }

    /// Set one cell; used by callers that assemble matrices by hand
    pub fn set(&mut self, row: usize, col: u32) {
        assert!((col as usize) < self.n_cols, "column {col} out of range");
        let cells = &mut self.rows[row];
        if let Err(pos) = cells.binary_search(&col) {
            cells.insert(pos, col);
        }
    }

    pub fn get(&self, row: usize, col: u32) -> bool {
        self.rows
            .get(row)
            .is_some_and(|cells| cells.binary_search(&col).is_ok())
    }

    /// Present columns of a row, ascending
    pub fn row(&self, row: usize) -> &[u32] {
        &self.rows[row]
    }

    /// Rows of real genes, excluding padding
    pub fn gene_rows(&self) -> &[Vec<u32>] {
        &self.rows[..self.gene_count]
    }

    /// Union of the present columns over a set of rows
    pub fn union_of(&self, rows: impl IntoIterator<Item = usize>) -> Vec<u32> {
        let mut cols: Vec<u32> = rows
            .into_iter()
            .flat_map(|r| self.rows[r].iter().copied())
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn gene_count(&self) -> usize {
        self.gene_count
    }
}

/// Row count rounded up to a whole number of blocks; 0 disables padding
pub fn padded_rows(gene_count: usize, block_size: usize) -> usize {
    if block_size == 0 {
        gene_count
    } else {
        gene_count.div_ceil(block_size) * block_size
    }
}
