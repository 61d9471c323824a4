//! Trial history keyed by stack geometry.
//!
//! Warm-start trials are kept per geometry so a repeated fit of the same
//! stack against the same window can reuse them. The key is a content hash
//! over the stack topology, the nominal values and the fitted angle range.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, XrrError};
use crate::parameters::CandidateParameters;
use crate::stack::StackGeometry;

/// Outcome of a single warm-start trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    /// Scored with the fast evaluator
    Complete,

    /// Stopped after the coarse evaluation
    Pruned,
}

/// One warm-start trial: the flat parameter vector and its cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub params: Vec<f64>,

    /// Fast cost when complete, coarse cost when pruned
    pub value: f64,

    pub state: TrialState,
}

impl TrialRecord {
    pub fn complete(params: Vec<f64>, value: f64) -> Self {
        Self {
            params,
            value,
            state: TrialState::Complete,
        }
    }

    pub fn pruned(params: Vec<f64>, value: f64) -> Self {
        Self {
            params,
            value,
            state: TrialState::Pruned,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == TrialState::Complete
    }
}

/// Number of completed trials in a history.
pub fn count_complete(trials: &[TrialRecord]) -> usize {
    trials.iter().filter(|t| t.is_complete()).count()
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

#[derive(Serialize)]
struct GeometrySignature {
    layers: usize,
    wavelength_nm: f64,
    theta_start: f64,
    theta_end: f64,
    blocks: Vec<(bool, usize, usize, usize)>,
    has_nk: Vec<bool>,
    n: Vec<Option<f64>>,
    k: Vec<Option<f64>>,
    t0: Vec<f64>,
    rho0: Vec<f64>,
    s0: Vec<f64>,
}

/// Short hex content hash identifying a fit geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryHash(String);

impl GeometryHash {
    /// Hash the geometry, the nominal parameters and the fitted angle range.
    ///
    /// Optical constants are rounded to 8 decimals and nominal thickness,
    /// density and roughness to 9, so values that print the same hash the
    /// same. Density is hashed for every layer because it sets the optical
    /// constants of layers without explicit ones.
    pub fn compute(
        geometry: &StackGeometry,
        nominal: &CandidateParameters,
        theta_range: (f64, f64),
    ) -> Result<Self> {
        let constants = geometry.explicit_constants();
        let has_nk = geometry.explicit_optics();
        let explicit = |value: f64, flag: bool| flag.then(|| round_to(value, 8));

        let signature = GeometrySignature {
            layers: geometry.layer_count(),
            wavelength_nm: geometry.wavelength_nm(),
            theta_start: theta_range.0,
            theta_end: theta_range.1,
            blocks: geometry
                .spans()
                .iter()
                .map(|s| (s.is_repeat, s.start, s.end, s.repeat))
                .collect(),
            n: constants
                .iter()
                .zip(has_nk.iter())
                .map(|(&(n, _), &flag)| explicit(n, flag))
                .collect(),
            k: constants
                .iter()
                .zip(has_nk.iter())
                .map(|(&(_, k), &flag)| explicit(k, flag))
                .collect(),
            has_nk,
            t0: nominal.thickness.iter().map(|&t| round_to(t, 9)).collect(),
            rho0: nominal.density.iter().map(|&rho| round_to(rho, 9)).collect(),
            s0: nominal.roughness.iter().map(|&s| round_to(s, 9)).collect(),
        };

        let bytes = serde_json::to_vec(&signature)?;
        let digest = Sha256::digest(&bytes);
        let mut hex = hex::encode(digest);
        hex.truncate(16);
        Ok(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeometryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable key-value storage of trial histories.
///
/// Concurrent fits sharing one key are not coordinated; callers serialize them.
pub trait TrialStore: Send + Sync + fmt::Debug {
    /// Trials stored under `key`, empty when there are none.
    fn get(&self, key: &GeometryHash) -> Result<Vec<TrialRecord>>;

    /// Replace the trials stored under `key`.
    fn put(&self, key: &GeometryHash, trials: &[TrialRecord]) -> Result<()>;

    /// Append trials to those stored under `key`.
    fn append(&self, key: &GeometryHash, trials: &[TrialRecord]) -> Result<()> {
        if trials.is_empty() {
            return Ok(());
        }
        let mut all = self.get(key)?;
        all.extend_from_slice(trials);
        self.put(key, &all)
    }
}

/// Process-local trial store.
#[derive(Debug, Default)]
pub struct InMemoryTrialStore {
    trials: Mutex<HashMap<GeometryHash, Vec<TrialRecord>>>,
}

impl InMemoryTrialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> XrrError {
    XrrError::Other("trial store lock poisoned".to_string())
}

impl TrialStore for InMemoryTrialStore {
    fn get(&self, key: &GeometryHash) -> Result<Vec<TrialRecord>> {
        let map = self.trials.lock().map_err(poisoned)?;
        Ok(map.get(key).cloned().unwrap_or_default())
    }

    fn put(&self, key: &GeometryHash, trials: &[TrialRecord]) -> Result<()> {
        let mut map = self.trials.lock().map_err(poisoned)?;
        map.insert(key.clone(), trials.to_vec());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TrialDocument {
    key: GeometryHash,
    trials: Vec<TrialRecord>,
}

/// Trial store writing one JSON document per key into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileTrialStore {
    dir: PathBuf,
}

impl JsonFileTrialStore {
    /// Store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &GeometryHash) -> PathBuf {
        self.dir.join(format!("xrr_{}.json", key))
    }
}

impl TrialStore for JsonFileTrialStore {
    fn get(&self, key: &GeometryHash) -> Result<Vec<TrialRecord>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        let doc: TrialDocument = serde_json::from_str(&text)?;
        Ok(doc.trials)
    }

    fn put(&self, key: &GeometryHash, trials: &[TrialRecord]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let doc = TrialDocument {
            key: key.clone(),
            trials: trials.to_vec(),
        };
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{Block, DensityProxy, Layer, LayerStack, Substrate};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn stack(t: f64) -> LayerStack {
        stack_with_density(t, 10.2)
    }

    fn stack_with_density(t: f64, mo_density: f64) -> LayerStack {
        LayerStack::new(
            vec![
                Block::Single(Layer::with_constants("A", 0.99999, 1e-7, t, 0.3)),
                Block::repeat(
                    "ML",
                    vec![
                        Layer::new("Mo", 2.8, 0.3, mo_density),
                        Layer::new("Si", 4.1, 0.3, 2.33),
                    ],
                    10,
                ),
            ],
            Substrate::with_constants("Si", 0.999992, 1e-7, 0.2),
        )
    }

    fn hash(stack: &LayerStack, range: (f64, f64)) -> GeometryHash {
        let geometry =
            StackGeometry::new(stack, 0.15418, Arc::new(DensityProxy::default())).unwrap();
        GeometryHash::compute(&geometry, &stack.nominal_parameters(), range).unwrap()
    }

    fn records() -> Vec<TrialRecord> {
        vec![
            TrialRecord::complete(vec![1.0, 2.0], 0.5),
            TrialRecord::pruned(vec![1.5, 2.5], 0.9),
        ]
    }

    #[test]
    fn test_hash_is_stable() {
        let a = hash(&stack(20.0), (0.1, 3.0));
        let b = hash(&stack(20.0), (0.1, 3.0));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_tracks_changes() {
        let base = hash(&stack(20.0), (0.1, 3.0));
        assert_ne!(base, hash(&stack(21.0), (0.1, 3.0)));
        assert_ne!(base, hash(&stack(20.0), (0.2, 3.0)));
        // Same thicknesses, different material.
        assert_ne!(base, hash(&stack_with_density(20.0, 8.0), (0.1, 3.0)));
        // Below the rounding precision.
        assert_eq!(base, hash(&stack(20.0 + 1e-12), (0.1, 3.0)));
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryTrialStore::new();
        let key = GeometryHash("abc".to_string());
        assert!(store.get(&key).unwrap().is_empty());

        store.append(&key, &records()).unwrap();
        store.append(&key, &records()[..1]).unwrap();
        let trials = store.get(&key).unwrap();
        assert_eq!(trials.len(), 3);
        assert_eq!(count_complete(&trials), 2);
    }

    #[test]
    fn test_json_file_store() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("xrrfit-history-{}-{}", std::process::id(), nanos));
        let store = JsonFileTrialStore::new(&dir);
        let key = GeometryHash("0123456789abcdef".to_string());

        assert!(store.get(&key).unwrap().is_empty());
        store.put(&key, &records()).unwrap();
        assert_eq!(store.get(&key).unwrap(), records());

        // A second store on the same directory sees the same history.
        let reopened = JsonFileTrialStore::new(&dir);
        reopened.append(&key, &records()).unwrap();
        assert_eq!(store.get(&key).unwrap().len(), 4);

        fs::remove_dir_all(&dir).unwrap();
    }
}
