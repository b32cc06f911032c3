//! JSON model input: a datacard together with its histograms.
//!
//! ```json
//! { "card": { "channels": [...], "processes": [...], "systematics": [...] },
//!   "shapes": { "ch1/data_obs": [...], "ch1/sig": [...], ... } }
//! ```

use bf_core::Result;
use serde::{Deserialize, Serialize};

use crate::card::Datacard;
use crate::model::BinnedModel;
use crate::shapes::ShapeStore;
use crate::table::{BuildOptions, VariationTable};

/// A card and the histograms it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInput {
    /// Model description.
    pub card: Datacard,
    /// Histograms keyed by `channel/process[/systVariation]`.
    pub shapes: ShapeStore,
}

impl ModelInput {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the variation table and wrap it in a [`BinnedModel`].
    pub fn build(&self, options: &BuildOptions) -> Result<BinnedModel> {
        let table = VariationTable::build(&self.card, &self.shapes, options)?;
        log::debug!(
            "model built: {} channels, {} bins, {} processes, {} systematics",
            table.channels().len(),
            table.nbins(),
            table.nproc(),
            table.nsyst()
        );
        Ok(BinnedModel::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_core::Error;

    const INPUT: &str = r#"{
        "card": {
            "channels": [{"name": "ch1", "processes": ["sig", "bkg"]}],
            "processes": [{"name": "sig", "signal": true}, {"name": "bkg"}],
            "systematics": []
        },
        "shapes": {"ch1/data_obs": [5.0], "ch1/sig": [1.0], "ch1/bkg": [4.0]}
    }"#;

    #[test]
    fn test_parse_and_build() {
        let m = ModelInput::from_json_str(INPUT).unwrap().build(&BuildOptions::default()).unwrap();
        assert_eq!(m.nbins(), 1);
        assert_eq!(m.nexpnom(), &[5.0]);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(ModelInput::from_json_str("{\"card\": 1}"), Err(Error::Json(_))));
    }
}
