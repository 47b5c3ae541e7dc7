//! Target profile: the per-target heuristic tables as TOML
//!
//! ```toml
//! [stages.pv]
//! label_loads = ["p_tile_fifo", "v_device"]
//! trigger_loads = ["p_tile_fifo"]
//! store_buffers = ["pv_tile_fifo"]
//!
//! [[noise.rules]]
//! pipeline = "SCALAR"
//! reason = "scalar plumbing"
//!
//! [classes]
//! compute_prefixes = ["MMAD", "VEXP"]
//! ```
//!
//! Omitted sections keep the built-in reference target defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassTable, OpClassifier};
use crate::error::{TimelineError, TimelineResult};
use crate::event::{LogEventParser, NoiseTable};
use crate::stage::{ComputeLabel, Core, StageModel};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub stages: StageModel,
    pub noise: NoiseTable,
    pub classes: ClassTable,
}

impl TargetProfile {
    pub fn load(path: impl AsRef<Path>) -> TimelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TimelineError::io(path, e))?;
        let profile = Self::from_toml_str(&text)?;
        log::info!("loaded target profile {}", path.display());
        Ok(profile)
    }

    pub fn from_toml_str(text: &str) -> TimelineResult<Self> {
        let profile: TargetProfile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Each stage needs triggers and stores; each core at most one windowed stage
    pub fn validate(&self) -> TimelineResult<()> {
        for (kind, spec) in self.stages.stages() {
            if spec.trigger_loads.is_empty() {
                return Err(TimelineError::profile(format!(
                    "stage {} has no trigger_loads",
                    kind.abbr()
                )));
            }
            if spec.store_buffers.is_empty() {
                return Err(TimelineError::profile(format!(
                    "stage {} has no store_buffers",
                    kind.abbr()
                )));
            }
        }
        for core in Core::ALL {
            let windows = self
                .stages
                .stages_on(core)
                .filter(|(_, s)| s.compute_label == ComputeLabel::StoreCounter)
                .count();
            if windows > 1 {
                return Err(TimelineError::profile(format!(
                    "{} core has {} store_counter stages, at most one allowed",
                    core, windows
                )));
            }
        }
        Ok(())
    }

    pub fn parser(&self) -> LogEventParser {
        LogEventParser::new(self.noise.clone())
    }

    pub fn classifier(&self) -> OpClassifier {
        OpClassifier::new(self.classes.clone())
    }
}
