//! Layer stack model.
//!
//! A [`LayerStack`] is an ordered list of [`Block`]s on a [`Substrate`], with
//! an implicit vacuum incidence medium on top. Repeat blocks share the
//! parameters of their member layers across all repetitions, so the fit
//! works on the *base* layers (each layer as written, in order) while the
//! forward model sees the expanded sequence of media.

use std::sync::Arc;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, XrrError};
use crate::parameters::CandidateParameters;

pub mod layer;
pub mod material;

pub use layer::{FreezeFlags, Layer, Optics, Substrate};
pub use material::{DensityProxy, DispersionTable, MaterialModel};

/// A group of layers in the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    /// A standalone layer
    Single(Layer),

    /// Member layers repeated `count` times (a superlattice)
    Repeat {
        name: String,
        layers: Vec<Layer>,
        count: usize,
    },
}

impl Block {
    pub fn repeat(name: impl Into<String>, layers: Vec<Layer>, count: usize) -> Self {
        Block::Repeat {
            name: name.into(),
            layers,
            count,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        match self {
            Block::Single(layer) => std::slice::from_ref(layer),
            Block::Repeat { layers, .. } => layers,
        }
    }

    fn layers_mut(&mut self) -> &mut [Layer] {
        match self {
            Block::Single(layer) => std::slice::from_mut(layer),
            Block::Repeat { layers, .. } => layers,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Block::Single(_) => 1,
            Block::Repeat { count, .. } => *count,
        }
    }

    /// Nominal period: sum of member thicknesses.
    pub fn period(&self) -> f64 {
        self.layers().iter().map(|l| l.thickness).sum()
    }
}

/// Position of one block inside the base-layer vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSpan {
    /// First base-layer index of the block
    pub start: usize,
    /// One past the last base-layer index
    pub end: usize,
    /// Number of repetitions
    pub repeat: usize,
    /// Whether the block was written as a repeat group
    pub is_repeat: bool,
}

impl BlockSpan {
    /// Repeat groups of at least two periods carry the periodicity constraint.
    pub fn is_periodic(&self) -> bool {
        self.is_repeat && self.repeat >= 2
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Flattened media from the vacuum down to the substrate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedStack {
    pub n: Vec<f64>,
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl ExpandedStack {
    fn with_capacity(media: usize) -> Self {
        let mut stack = Self {
            n: Vec::with_capacity(media),
            k: Vec::with_capacity(media),
            d: Vec::with_capacity(media),
            sigma: Vec::with_capacity(media),
        };
        stack.push(1.0, 0.0, 0.0, 0.0);
        stack
    }

    fn push(&mut self, n: f64, k: f64, d: f64, sigma: f64) {
        self.n.push(n);
        self.k.push(k);
        self.d.push(d);
        self.sigma.push(sigma);
    }

    /// Number of media including vacuum and substrate.
    pub fn media_count(&self) -> usize {
        self.n.len()
    }
}

/// Masks of the parameters that take part in the optimization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSlots {
    pub thickness: Vec<bool>,
    pub density: Vec<bool>,
    pub roughness: Vec<bool>,
}

impl FreeSlots {
    pub fn count(&self) -> usize {
        self.thickness
            .iter()
            .chain(self.density.iter())
            .chain(self.roughness.iter())
            .filter(|&&free| free)
            .count()
    }
}

/// An ordered multilayer description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStack {
    pub blocks: Vec<Block>,
    pub substrate: Substrate,
}

/// Layers named `Si` at least this thick (1 mm, in nm) are taken as the substrate.
pub const SUBSTRATE_THICKNESS_NM: f64 = 1.0e6;

/// Density assumed for a derived substrate when the stack has no layers.
const DEFAULT_SUBSTRATE_DENSITY: f64 = 2.33;

impl LayerStack {
    pub fn new(blocks: Vec<Block>, substrate: Substrate) -> Self {
        Self { blocks, substrate }
    }

    /// Build a stack from layer groups, finding the substrate when none is given.
    ///
    /// Without an explicit substrate, the first layer named `si` (any case)
    /// that is at least [`SUBSTRATE_THICKNESS_NM`] thick is taken out of its
    /// group and becomes the substrate, keeping its optics, density and
    /// roughness. Groups left empty are dropped. If no such layer exists, a
    /// density-derived substrate with zero roughness is assumed, using the
    /// density of the last remaining layer.
    ///
    /// # Errors
    ///
    /// * `XrrError::Model` when the groups contain no layers at all
    pub fn from_groups(mut blocks: Vec<Block>, substrate: Option<Substrate>) -> Result<Self> {
        if blocks.iter().all(|b| b.layers().is_empty()) {
            return Err(XrrError::Model("no layers defined".to_string()));
        }
        if let Some(substrate) = substrate {
            return Ok(Self::new(blocks, substrate));
        }

        let position = blocks.iter().enumerate().find_map(|(bi, block)| {
            block
                .layers()
                .iter()
                .position(is_substrate_like)
                .map(|li| (bi, li))
        });
        let detected = position.map(|(bi, li)| {
            let layer = match &mut blocks[bi] {
                Block::Single(layer) => layer.clone(),
                Block::Repeat { layers, .. } => layers.remove(li),
            };
            if matches!(blocks[bi], Block::Single(_)) || blocks[bi].layers().is_empty() {
                blocks.remove(bi);
            }
            layer
        });

        let substrate = match detected {
            Some(layer) => {
                debug!(name = %layer.name, "thick silicon layer taken as substrate");
                Substrate {
                    name: layer.name,
                    optics: layer.optics,
                    density: layer.density,
                    roughness: layer.roughness.max(0.0),
                }
            }
            None => {
                let density = blocks
                    .iter()
                    .flat_map(|b| b.layers().iter())
                    .last()
                    .map_or(DEFAULT_SUBSTRATE_DENSITY, |l| l.density);
                debug!(density, "no substrate given, deriving one from the last layer");
                Substrate::new("substrate", Optics::Density, 0.0).with_density(density)
            }
        };
        Ok(Self::new(blocks, substrate))
    }

    /// Check topology and nominal values.
    pub fn validate(&self) -> Result<()> {
        for block in &self.blocks {
            if let Block::Repeat {
                name,
                layers,
                count,
            } = block
            {
                if layers.is_empty() {
                    return Err(XrrError::Model(format!(
                        "repeat block '{}' has no layers",
                        name
                    )));
                }
                if *count == 0 {
                    return Err(XrrError::Model(format!(
                        "repeat block '{}' has a zero repeat count",
                        name
                    )));
                }
            }
            for layer in block.layers() {
                layer.validate()?;
            }
        }
        self.substrate.validate()?;

        let media = self.media_count();
        if media < 3 {
            return Err(XrrError::Model(format!(
                "stack expands to {} media, at least one finite layer between vacuum and substrate is required",
                media
            )));
        }
        Ok(())
    }

    /// Layers in base order (repeat members once each).
    pub fn base_layers(&self) -> impl Iterator<Item = &Layer> {
        self.blocks.iter().flat_map(|b| b.layers().iter())
    }

    pub fn layer_count(&self) -> usize {
        self.blocks.iter().map(|b| b.layers().len()).sum()
    }

    /// Media after expansion: vacuum + repeated layers + substrate.
    pub fn media_count(&self) -> usize {
        2 + self
            .blocks
            .iter()
            .map(|b| b.layers().len() * b.count())
            .sum::<usize>()
    }

    pub fn spans(&self) -> Vec<BlockSpan> {
        let mut start = 0;
        self.blocks
            .iter()
            .map(|block| {
                let end = start + block.layers().len();
                let span = BlockSpan {
                    start,
                    end,
                    repeat: block.count(),
                    is_repeat: matches!(block, Block::Repeat { .. }),
                };
                start = end;
                span
            })
            .collect()
    }

    /// Whether peak weighting applies: a repeat of three or more periods.
    pub fn is_likely_periodic(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, Block::Repeat { count, .. } if *count >= 3))
    }

    pub fn free_slots(&self) -> FreeSlots {
        FreeSlots {
            thickness: self.base_layers().map(|l| !l.freeze.thickness).collect(),
            density: self.base_layers().map(|l| l.density_is_free()).collect(),
            roughness: self.base_layers().map(|l| !l.freeze.roughness).collect(),
        }
    }

    pub fn nominal_parameters(&self) -> CandidateParameters {
        CandidateParameters {
            thickness: self.base_layers().map(|l| l.thickness).collect(),
            density: self.base_layers().map(|l| l.density).collect(),
            roughness: self.base_layers().map(|l| l.roughness).collect(),
        }
    }

    /// Flatten the nominal stack at `wavelength_nm`.
    pub fn expand(
        &self,
        wavelength_nm: f64,
        material: &dyn MaterialModel,
    ) -> Result<ExpandedStack> {
        self.validate()?;
        let mut n_base = Vec::with_capacity(self.layer_count());
        let mut k_base = Vec::with_capacity(self.layer_count());
        for layer in self.base_layers() {
            let (n, k) = layer.optics.resolve(layer.density, wavelength_nm, material)?;
            n_base.push(n);
            k_base.push(k);
        }
        let (n_sub, k_sub) =
            self.substrate
                .optics
                .resolve(self.substrate.density, wavelength_nm, material)?;
        let params = self.nominal_parameters();

        Ok(expand_media(
            &self.spans(),
            &n_base,
            &k_base,
            params.thickness.view(),
            params.roughness.view(),
            (n_sub, k_sub, self.substrate.roughness),
            self.media_count(),
        ))
    }

    /// Write optimized values back into the stack.
    ///
    /// Frozen entries, and densities of layers with explicit optics, are left untouched.
    pub fn apply(&mut self, params: &CandidateParameters) -> Result<()> {
        let count = self.layer_count();
        if params.layer_count() != count {
            return Err(XrrError::DimensionMismatch(format!(
                "expected parameters for {} layers, got {}",
                count,
                params.layer_count()
            )));
        }

        let layers = self.blocks.iter_mut().flat_map(|b| b.layers_mut().iter_mut());
        for (i, layer) in layers.enumerate() {
            if !layer.freeze.thickness {
                layer.thickness = params.thickness[i];
            }
            if layer.density_is_free() {
                layer.density = params.density[i];
            }
            if !layer.freeze.roughness {
                layer.roughness = params.roughness[i];
            }
        }
        Ok(())
    }
}

/// Optical constants of one base layer after resolving explicit optics.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BaseOptics {
    Explicit(f64, f64),
    Density,
}

/// Immutable snapshot of a stack resolved at one wavelength.
///
/// Expands candidate parameter vectors without touching the stack again;
/// this is what the optimizer evaluates thousands of times per run.
#[derive(Debug, Clone)]
pub struct StackGeometry {
    wavelength_nm: f64,
    optics: Vec<BaseOptics>,
    spans: Vec<BlockSpan>,
    substrate: (f64, f64, f64),
    media: usize,
    material: Arc<dyn MaterialModel>,
}

impl StackGeometry {
    pub fn new(
        stack: &LayerStack,
        wavelength_nm: f64,
        material: Arc<dyn MaterialModel>,
    ) -> Result<Self> {
        stack.validate()?;

        let optics = stack
            .base_layers()
            .map(|layer| {
                Ok(match layer.optics.resolve_explicit(wavelength_nm)? {
                    Some((n, k)) => BaseOptics::Explicit(n, k),
                    None => BaseOptics::Density,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (n_sub, k_sub) = stack.substrate.optics.resolve(
            stack.substrate.density,
            wavelength_nm,
            material.as_ref(),
        )?;

        Ok(Self {
            wavelength_nm,
            optics,
            spans: stack.spans(),
            substrate: (n_sub, k_sub, stack.substrate.roughness),
            media: stack.media_count(),
            material,
        })
    }

    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength_nm
    }

    pub fn layer_count(&self) -> usize {
        self.optics.len()
    }

    pub fn spans(&self) -> &[BlockSpan] {
        &self.spans
    }

    pub fn media_count(&self) -> usize {
        self.media
    }

    /// Which base layers carry explicit optical constants.
    pub fn explicit_optics(&self) -> Vec<bool> {
        self.optics
            .iter()
            .map(|o| matches!(o, BaseOptics::Explicit(..)))
            .collect()
    }

    /// Explicit `(n, k)` of the base layers, `(NaN, NaN)` where density-derived.
    pub fn explicit_constants(&self) -> Vec<(f64, f64)> {
        self.optics
            .iter()
            .map(|o| match *o {
                BaseOptics::Explicit(n, k) => (n, k),
                BaseOptics::Density => (f64::NAN, f64::NAN),
            })
            .collect()
    }

    pub fn substrate(&self) -> (f64, f64, f64) {
        self.substrate
    }

    pub fn expand(&self, params: &CandidateParameters) -> ExpandedStack {
        self.expand_parts(
            params.thickness.view(),
            params.density.view(),
            params.roughness.view(),
        )
    }

    /// Expand a flat `[t.., rho.., sigma..]` vector.
    pub fn expand_flat(&self, x: ArrayView1<f64>) -> ExpandedStack {
        let l = self.layer_count();
        self.expand_parts(
            x.slice(ndarray::s![0..l]),
            x.slice(ndarray::s![l..2 * l]),
            x.slice(ndarray::s![2 * l..3 * l]),
        )
    }

    fn expand_parts(
        &self,
        thickness: ArrayView1<f64>,
        density: ArrayView1<f64>,
        roughness: ArrayView1<f64>,
    ) -> ExpandedStack {
        let mut n_base = Vec::with_capacity(self.optics.len());
        let mut k_base = Vec::with_capacity(self.optics.len());
        for (i, optics) in self.optics.iter().enumerate() {
            let (n, k) = match *optics {
                BaseOptics::Explicit(n, k) => (n, k),
                BaseOptics::Density => self
                    .material
                    .optical_constants(density[i], self.wavelength_nm),
            };
            n_base.push(n);
            k_base.push(k);
        }

        expand_media(
            &self.spans,
            &n_base,
            &k_base,
            thickness,
            roughness,
            self.substrate,
            self.media,
        )
    }
}

fn expand_media(
    spans: &[BlockSpan],
    n_base: &[f64],
    k_base: &[f64],
    thickness: ArrayView1<f64>,
    roughness: ArrayView1<f64>,
    substrate: (f64, f64, f64),
    media: usize,
) -> ExpandedStack {
    let mut out = ExpandedStack::with_capacity(media);
    for span in spans {
        for _ in 0..span.repeat {
            for i in span.start..span.end {
                out.push(n_base[i], k_base[i], thickness[i], roughness[i]);
            }
        }
    }
    out.push(substrate.0, substrate.1, 0.0, substrate.2);
    out
}

fn is_substrate_like(layer: &Layer) -> bool {
    layer.name.trim().eq_ignore_ascii_case("si") && layer.thickness >= SUBSTRATE_THICKNESS_NM
}

/// Nominal period of each periodic block, in span order.
pub fn period_targets(spans: &[BlockSpan], nominal_thickness: &Array1<f64>) -> Vec<f64> {
    spans
        .iter()
        .filter(|s| s.is_periodic())
        .map(|s| nominal_thickness.slice(ndarray::s![s.start..s.end]).sum())
        .collect()
}
