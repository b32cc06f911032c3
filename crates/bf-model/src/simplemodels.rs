//! Simple model builders for quick experiments, tests and benches.
//!
//! Each builder returns a [`ModelInput`]: a single-channel card named `ch1`
//! with a signal process `sig` and a background process `bkg`, plus the
//! matching histograms. Inconsistent bin counts surface as validation errors
//! from [`ModelInput::build`].

use std::collections::BTreeMap;

use crate::card::{ChannelSpec, Datacard, Effect, ProcessSpec, SystematicSpec};
use crate::input::ModelInput;
use crate::shapes::{ShapeStore, Variation, data_key, nominal_key, variation_key};

/// Channel name used by the builders.
pub const CHANNEL: &str = "ch1";

/// Single-channel builder steps on [`CHANNEL`].
impl ModelInput {
    /// Add an `lnN` systematic affecting `process` with `effect`.
    pub fn with_lnn(mut self, name: &str, process: &str, effect: Effect) -> Self {
        self.card.systematics.push(SystematicSpec {
            name: name.to_string(),
            kind: "lnN".to_string(),
            effects: single_effect(process, effect),
        });
        self
    }

    /// Add a shape systematic on `process` with unit scale factor and the given
    /// Up/Down templates.
    pub fn with_shape(mut self, name: &str, process: &str, up: &[f64], down: &[f64]) -> Self {
        self.card.systematics.push(SystematicSpec {
            name: name.to_string(),
            kind: "shape".to_string(),
            effects: single_effect(process, Effect::Symmetric(1.0)),
        });
        self.shapes.insert(variation_key(CHANNEL, process, name, Variation::Up), up.to_vec());
        self.shapes.insert(variation_key(CHANNEL, process, name, Variation::Down), down.to_vec());
        self
    }
}

fn single_effect(process: &str, effect: Effect) -> BTreeMap<String, BTreeMap<String, Effect>> {
    BTreeMap::from([(CHANNEL.to_string(), BTreeMap::from([(process.to_string(), effect)]))])
}

/// One channel, one signal process (`sig`) and one background (`bkg`), no systematics.
pub fn signal_background(signal: &[f64], bkg: &[f64], data: &[f64]) -> ModelInput {
    let card = Datacard {
        channels: vec![ChannelSpec {
            name: CHANNEL.to_string(),
            processes: vec!["sig".to_string(), "bkg".to_string()],
        }],
        processes: vec![
            ProcessSpec { name: "sig".to_string(), signal: true },
            ProcessSpec { name: "bkg".to_string(), signal: false },
        ],
        systematics: Vec::new(),
    };
    let shapes = ShapeStore::new()
        .with(data_key(CHANNEL), data.to_vec())
        .with(nominal_key(CHANNEL, "sig"), signal.to_vec())
        .with(nominal_key(CHANNEL, "bkg"), bkg.to_vec());
    ModelInput { card, shapes }
}

/// [`signal_background`] plus a 5% luminosity `lnN` on both processes, an
/// asymmetric background normalization and a background shape systematic
/// with templates `bkg * (1 ± 0.1 * slope)`, where the slope runs linearly
/// from -1 in the first bin to +1 in the last.
pub fn with_systematics(signal: &[f64], bkg: &[f64], data: &[f64]) -> ModelInput {
    let n = bkg.len();
    let slope = |i: usize| if n > 1 { -1.0 + 2.0 * i as f64 / (n - 1) as f64 } else { 0.0 };
    let up: Vec<f64> = bkg.iter().enumerate().map(|(i, b)| b * (1.0 + 0.1 * slope(i))).collect();
    let down: Vec<f64> = bkg.iter().enumerate().map(|(i, b)| b * (1.0 - 0.1 * slope(i))).collect();

    let mut model = signal_background(signal, bkg, data);
    model.card.systematics.push(SystematicSpec {
        name: "lumi".to_string(),
        kind: "lnN".to_string(),
        effects: BTreeMap::from([(
            CHANNEL.to_string(),
            BTreeMap::from([
                ("sig".to_string(), Effect::Symmetric(1.05)),
                ("bkg".to_string(), Effect::Symmetric(1.05)),
            ]),
        )]),
    });
    model
        .with_lnn("bkg_norm", "bkg", Effect::Asymmetric([0.9, 1.15]))
        .with_shape("bkg_shape", "bkg", &up, &down)
}
