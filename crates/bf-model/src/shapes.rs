//! Histogram lookup.
//!
//! Histograms are addressed by name:
//! `{channel}/data_obs`, `{channel}/{process}`, `{channel}/{process}/{syst}Up`
//! and `{channel}/{process}/{syst}Down`. Values are per-bin contents without
//! under/overflow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Direction of a shape variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    /// `+1 sigma` template.
    Up,
    /// `-1 sigma` template.
    Down,
}

impl Variation {
    /// Histogram-name suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            Variation::Up => "Up",
            Variation::Down => "Down",
        }
    }

    /// `+1` for up, `-1` for down.
    pub fn sign(self) -> f64 {
        match self {
            Variation::Up => 1.0,
            Variation::Down => -1.0,
        }
    }

    /// Lower-case label used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            Variation::Up => "up",
            Variation::Down => "down",
        }
    }
}

/// Name of the observed-data histogram of a channel.
pub fn data_key(channel: &str) -> String {
    format!("{}/data_obs", channel)
}

/// Name of the nominal histogram of a process in a channel.
pub fn nominal_key(channel: &str, process: &str) -> String {
    format!("{}/{}", channel, process)
}

/// Name of a shape-variation histogram.
pub fn variation_key(channel: &str, process: &str, syst: &str, dir: Variation) -> String {
    format!("{}/{}/{}{}", channel, process, syst, dir.suffix())
}

/// Source of histograms by name.
pub trait ShapeProvider {
    /// Bin contents of the named histogram, or `None` if absent.
    fn shape(&self, name: &str) -> Option<&[f64]>;
}

/// In-memory [`ShapeProvider`] backed by a name → contents map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeStore {
    histograms: BTreeMap<String, Vec<f64>>,
}

impl ShapeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a histogram.
    pub fn insert(&mut self, name: impl Into<String>, contents: Vec<f64>) {
        self.histograms.insert(name.into(), contents);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, contents: Vec<f64>) -> Self {
        self.insert(name, contents);
        self
    }

    /// Number of histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }
}

impl ShapeProvider for ShapeStore {
    fn shape(&self, name: &str) -> Option<&[f64]> {
        self.histograms.get(name).map(Vec::as_slice)
    }
}
