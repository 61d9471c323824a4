//! Periodicity constraint for repeat blocks.
//!
//! The period of a superlattice is pinned by the Bragg peak positions and is
//! usually known far better than the individual layer thicknesses. After
//! every update the free thicknesses of each periodic block are rescaled so
//! the block keeps its nominal period; frozen thicknesses are never touched.

use ndarray::{s, Array1, ArrayViewMut1};

use crate::stack::BlockSpan;

#[derive(Debug, Clone, PartialEq)]
struct PeriodicBlock {
    start: usize,
    end: usize,
    target: f64,
}

/// Rescales free thicknesses so each periodic block sums to its nominal period.
#[derive(Debug, Clone, PartialEq)]
pub struct Periodicity {
    blocks: Vec<PeriodicBlock>,
    frozen: Vec<bool>,
}

impl Periodicity {
    /// `frozen[i]` marks base-layer thicknesses that must not be scaled.
    pub fn new(spans: &[BlockSpan], nominal_thickness: &Array1<f64>, frozen: Vec<bool>) -> Self {
        let blocks = spans
            .iter()
            .filter(|span| span.is_periodic())
            .map(|span| PeriodicBlock {
                start: span.start,
                end: span.end,
                target: nominal_thickness.slice(s![span.start..span.end]).sum(),
            })
            .collect();
        Self { blocks, frozen }
    }

    /// No periodic block: normalization is the identity.
    pub fn is_trivial(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Nominal period of each periodic block.
    pub fn targets(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.target).collect()
    }

    /// Normalize a thickness vector in place.
    ///
    /// A block is left alone when all its entries are frozen, when its free
    /// entries sum to zero, or when its frozen entries already reach the period.
    pub fn normalize_thickness(&self, mut thickness: ArrayViewMut1<f64>) {
        for block in &self.blocks {
            let mut fixed = 0.0;
            let mut free = 0.0;
            for i in block.start..block.end {
                if self.frozen[i] {
                    fixed += thickness[i];
                } else {
                    free += thickness[i];
                }
            }
            if free > 0.0 && block.target > fixed {
                let scale = (block.target - fixed) / free;
                for i in block.start..block.end {
                    if !self.frozen[i] {
                        thickness[i] *= scale;
                    }
                }
            }
        }
    }

    /// Normalize the thickness part of a flat `[t.., rho.., sigma..]` vector.
    pub fn normalize(&self, x: &mut Array1<f64>) {
        if self.is_trivial() {
            return;
        }
        let layers = self.frozen.len();
        self.normalize_thickness(x.slice_mut(s![0..layers]));
    }
}
