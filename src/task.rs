//! Canonical timeline task shared by the scheduler and the reconstructor

use serde::{Deserialize, Serialize};

use crate::stage::{Core, StageKind};

/// Sub-task role within one stage iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// k-th distinct load of the iteration
    Load(usize),
    Compute,
    Store,
}

impl Role {
    pub fn suffix(&self) -> String {
        match self {
            Role::Load(k) => format!("load{}", k),
            Role::Compute => "comp".to_string(),
            Role::Store => "store".to_string(),
        }
    }

    /// Sub-row within a stage band (load, compute, store)
    pub fn lane(&self) -> usize {
        match self {
            Role::Load(_) => 0,
            Role::Compute => 1,
            Role::Store => 2,
        }
    }
}

/// One occupied interval on a core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// `<stage>_<role>`, e.g. `pv_load0`, `qk_comp`
    pub label: String,
    pub stage: StageKind,
    pub role: Role,
    pub core: Core,
    pub tile: usize,
    pub start: u64,
    pub end: u64,
}

impl Task {
    pub fn new(stage: StageKind, role: Role, tile: usize, start: u64, end: u64) -> Self {
        Self {
            label: format!("{}_{}", stage.abbr(), role.suffix()),
            stage,
            role,
            core: stage.core(),
            tile,
            start,
            end,
        }
    }

    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Task) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Ordering key for rendering and diffing
    pub fn sort_key(&self) -> (u64, usize, &str) {
        (self.start, self.tile, self.label.as_str())
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<10} {:>4} -> {:>4} ({} cycles) on {}",
            self.label,
            self.start,
            self.end,
            self.duration(),
            self.core
        )
    }
}
