//! Parsed model description.
//!
//! A [`Datacard`] lists channels, processes and systematics. It is the already
//! parsed form; the text grammar of datacards is not handled here.

use std::collections::{BTreeMap, BTreeSet};

use bf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Model description: channels, processes, systematics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datacard {
    /// Channels in card order. Bins are concatenated in this order.
    pub channels: Vec<ChannelSpec>,
    /// Processes in card order.
    pub processes: Vec<ProcessSpec>,
    /// Systematics in card order.
    #[serde(default)]
    pub systematics: Vec<SystematicSpec>,
}

/// A channel and the processes contributing to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name.
    pub name: String,
    /// Names of the processes present in this channel.
    pub processes: Vec<String>,
}

/// A physics process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name.
    pub name: String,
    /// Signal processes each get their own signal-strength parameter.
    #[serde(default)]
    pub signal: bool,
}

/// A systematic uncertainty and its per-(channel, process) effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystematicSpec {
    /// Nuisance parameter name.
    pub name: String,
    /// Kind string, `lnN` or anything containing `shape`.
    pub kind: String,
    /// `effects[channel][process]`; missing entries mean no effect.
    #[serde(default)]
    pub effects: BTreeMap<String, BTreeMap<String, Effect>>,
}

/// Effect of a systematic on one (channel, process) pair.
///
/// For `lnN` this is a kappa or a `[kappa_down, kappa_up]` pair; for shape
/// systematics it is the scale factor applied to the log ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Effect {
    /// Single value.
    Symmetric(f64),
    /// `[down, up]`.
    Asymmetric([f64; 2]),
}

/// Supported systematic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystematicKind {
    /// Log-normal rate uncertainty, uniform over the bins of a channel.
    LogNormal,
    /// Bin-by-bin template morphing from Up/Down histograms.
    Shape,
}

impl SystematicKind {
    /// Classify a kind string.
    ///
    /// `"lnN"` is log-normal, any string containing `"shape"` (e.g. `shapeN2`)
    /// is a shape systematic. Anything else is a configuration error.
    pub fn parse(kind: &str) -> Result<Self> {
        if kind == "lnN" {
            Ok(SystematicKind::LogNormal)
        } else if kind.contains("shape") {
            Ok(SystematicKind::Shape)
        } else {
            Err(Error::Configuration(format!("Unsupported systematic type '{}'", kind)))
        }
    }
}

impl SystematicSpec {
    /// Parsed kind.
    pub fn kind(&self) -> Result<SystematicKind> {
        SystematicKind::parse(&self.kind)
    }

    /// Effect on `(channel, process)`, if any.
    pub fn effect(&self, channel: &str, process: &str) -> Option<Effect> {
        self.effects.get(channel).and_then(|m| m.get(process)).copied()
    }
}

impl Datacard {
    /// Names of signal processes in card order (one signal strength each).
    pub fn signal_processes(&self) -> Vec<&str> {
        self.processes.iter().filter(|p| p.signal).map(|p| p.name.as_str()).collect()
    }

    /// Check names are unique and every referenced process/channel exists.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::Validation("Datacard has no channels".to_string()));
        }

        let mut procs = BTreeSet::new();
        for p in &self.processes {
            if !procs.insert(p.name.as_str()) {
                return Err(Error::Validation(format!("Duplicate process '{}'", p.name)));
            }
        }

        let mut chans = BTreeSet::new();
        for ch in &self.channels {
            if !chans.insert(ch.name.as_str()) {
                return Err(Error::Validation(format!("Duplicate channel '{}'", ch.name)));
            }
            for p in &ch.processes {
                if !procs.contains(p.as_str()) {
                    return Err(Error::Validation(format!(
                        "Channel '{}' references unknown process '{}'",
                        ch.name, p
                    )));
                }
            }
        }

        let mut systs = BTreeSet::new();
        for s in &self.systematics {
            if !systs.insert(s.name.as_str()) {
                return Err(Error::Validation(format!("Duplicate systematic '{}'", s.name)));
            }
            for (chan, by_proc) in &s.effects {
                if !chans.contains(chan.as_str()) {
                    return Err(Error::Validation(format!(
                        "Systematic '{}' references unknown channel '{}'",
                        s.name, chan
                    )));
                }
                for proc in by_proc.keys() {
                    if !procs.contains(proc.as_str()) {
                        return Err(Error::Validation(format!(
                            "Systematic '{}' references unknown process '{}'",
                            s.name, proc
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
