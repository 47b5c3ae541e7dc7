//! Static description of the 2-core / 4-stage tile pipeline
//!
//! Stages run in a fixed per-tile chain `qk -> p -> pv -> gu`. `qk` and `pv`
//! run on the cube core, `p` and `gu` on the vector core. The buffer roles
//! attached to each stage drive trace reconstruction and are the only part
//! of the model a target profile may override.

use serde::{Deserialize, Serialize};

/// One of the two modeled hardware resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Core {
    Cube,
    Vector,
}

impl Core {
    pub const ALL: [Core; 2] = [Core::Cube, Core::Vector];

    pub fn name(&self) -> &'static str {
        match self {
            Core::Cube => "cube",
            Core::Vector => "vector",
        }
    }
}

impl std::fmt::Display for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Pipeline stage identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Qk,
    P,
    Pv,
    Gu,
}

impl StageKind {
    /// Per-tile dependency chain, producer first
    pub const CHAIN: [StageKind; 4] = [StageKind::Qk, StageKind::P, StageKind::Pv, StageKind::Gu];

    /// Short name used in task labels (`qk`, `p`, `pv`, `gu`)
    pub fn abbr(&self) -> &'static str {
        match self {
            StageKind::Qk => "qk",
            StageKind::P => "p",
            StageKind::Pv => "pv",
            StageKind::Gu => "gu",
        }
    }

    /// Long name used in reconstructed timelines (`compute_qk`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Qk => "compute_qk",
            StageKind::P => "compute_p",
            StageKind::Pv => "compute_pv",
            StageKind::Gu => "compute_gu",
        }
    }

    /// Fixed core affinity
    pub fn core(&self) -> Core {
        match self {
            StageKind::Qk | StageKind::Pv => Core::Cube,
            StageKind::P | StageKind::Gu => Core::Vector,
        }
    }

    /// Stage whose store this stage's load waits on
    pub fn producer(&self) -> Option<StageKind> {
        match self {
            StageKind::Qk => None,
            StageKind::P => Some(StageKind::Qk),
            StageKind::Pv => Some(StageKind::P),
            StageKind::Gu => Some(StageKind::Pv),
        }
    }

    pub fn consumer(&self) -> Option<StageKind> {
        match self {
            StageKind::Qk => Some(StageKind::P),
            StageKind::P => Some(StageKind::Pv),
            StageKind::Pv => Some(StageKind::Gu),
            StageKind::Gu => None,
        }
    }

    pub fn from_abbr(abbr: &str) -> Option<Self> {
        Self::CHAIN.into_iter().find(|s| s.abbr() == abbr)
    }

    /// Accepts either the short or the long form
    pub fn parse(name: &str) -> Option<Self> {
        Self::CHAIN
            .into_iter()
            .find(|s| s.abbr() == name || s.name() == name)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A stage with its compute cost, as the scheduler sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub core: Core,
    /// Compute cycles, excluding IO
    pub cycles: u64,
}

impl Stage {
    pub fn new(kind: StageKind, cycles: u64) -> Self {
        Self {
            kind,
            core: kind.core(),
            cycles,
        }
    }
}

/// How a stage's compute instructions pick their loop index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeLabel {
    /// One compute per loop, numbered in issue order
    Sequential,
    /// Tied to the loop whose store is next
    StoreCounter,
    /// Oldest opened loop not yet computed, else the last one computed
    #[serde(alias = "last_retired")]
    OldestPending,
}

/// Buffer roles of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Loads of these buffers receive a loop-indexed stage name
    pub label_loads: Vec<String>,
    /// Loads of these buffers advance the loop index
    pub trigger_loads: Vec<String>,
    /// Advance only once every trigger buffer was seen (otherwise any one)
    #[serde(default)]
    pub require_all: bool,
    pub store_buffers: Vec<String>,
    /// Other buffers that belong to this stage
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub stores_every_tile: bool,
    #[serde(default = "default_compute_label")]
    pub compute_label: ComputeLabel,
}

fn default_true() -> bool {
    true
}

fn default_compute_label() -> ComputeLabel {
    ComputeLabel::Sequential
}

fn contains(list: &[String], buffer: &str) -> bool {
    list.iter().any(|b| b.eq_ignore_ascii_case(buffer))
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl StageSpec {
    pub fn is_label(&self, buffer: &str) -> bool {
        contains(&self.label_loads, buffer)
    }

    pub fn is_trigger(&self, buffer: &str) -> bool {
        contains(&self.trigger_loads, buffer)
    }

    pub fn is_store(&self, buffer: &str) -> bool {
        contains(&self.store_buffers, buffer)
    }

    /// Whether a load or store of `buffer` belongs to this stage
    pub fn correlates(&self, buffer: &str) -> bool {
        self.is_label(buffer)
            || self.is_trigger(buffer)
            || self.is_store(buffer)
            || contains(&self.aliases, buffer)
    }
}

/// The full four-stage model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageModel {
    pub qk: StageSpec,
    pub p: StageSpec,
    pub pv: StageSpec,
    pub gu: StageSpec,
}

impl StageModel {
    pub fn spec(&self, kind: StageKind) -> &StageSpec {
        match kind {
            StageKind::Qk => &self.qk,
            StageKind::P => &self.p,
            StageKind::Pv => &self.pv,
            StageKind::Gu => &self.gu,
        }
    }

    /// Stages in chain order
    pub fn stages(&self) -> impl Iterator<Item = (StageKind, &StageSpec)> + '_ {
        StageKind::CHAIN.into_iter().map(move |k| (k, self.spec(k)))
    }

    /// Stages bound to `core`, in chain order
    pub fn stages_on(&self, core: Core) -> impl Iterator<Item = (StageKind, &StageSpec)> + '_ {
        self.stages().filter(move |(k, _)| k.core() == core)
    }

    /// Stage owning a load/store of `buffer` on `core`; first match in chain order
    pub fn correlate(&self, core: Core, buffer: &str) -> Option<StageKind> {
        self.stages_on(core)
            .find(|(_, spec)| spec.correlates(buffer))
            .map(|(k, _)| k)
    }

    /// Stage on `core` whose compute is located by load/store windows
    pub fn window_stage(&self, core: Core) -> Option<StageKind> {
        self.stages_on(core)
            .find(|(_, spec)| spec.compute_label == ComputeLabel::StoreCounter)
            .map(|(k, _)| k)
    }

    /// Stage on `core` that accumulates across tiles and stores only once
    pub fn accumulating_stage(&self, core: Core) -> Option<StageKind> {
        self.stages_on(core)
            .find(|(_, spec)| !spec.stores_every_tile)
            .map(|(k, _)| k)
    }

    /// Producer -> consumer edges of the per-tile chain
    pub fn dependencies(&self) -> Vec<(StageKind, StageKind)> {
        StageKind::CHAIN
            .into_iter()
            .filter_map(|k| k.consumer().map(|c| (k, c)))
            .collect()
    }
}

impl Default for StageModel {
    /// Buffer roles of the reference flash-attention target
    fn default() -> Self {
        Self {
            qk: StageSpec {
                // q is reused across loops; the k load drives the loop
                label_loads: names(&["q_device", "k_device"]),
                trigger_loads: names(&["k_device"]),
                require_all: false,
                store_buffers: names(&["qk_tile_fifo"]),
                aliases: names(&["qk_device", "qk_tile"]),
                stores_every_tile: true,
                compute_label: ComputeLabel::Sequential,
            },
            p: StageSpec {
                label_loads: names(&["qk_tile_fifo"]),
                trigger_loads: names(&["qk_tile_fifo"]),
                require_all: false,
                store_buffers: names(&["p_tile_fifo"]),
                aliases: names(&["qk_tile", "p_tile"]),
                stores_every_tile: true,
                compute_label: ComputeLabel::StoreCounter,
            },
            pv: StageSpec {
                label_loads: names(&["p_tile_fifo", "v_device"]),
                trigger_loads: names(&["p_tile_fifo"]),
                require_all: false,
                store_buffers: names(&["pv_tile_fifo"]),
                aliases: names(&["pv_tile"]),
                stores_every_tile: true,
                compute_label: ComputeLabel::Sequential,
            },
            gu: StageSpec {
                label_loads: names(&["pv_tile_fifo"]),
                trigger_loads: names(&["pv_tile_fifo"]),
                require_all: false,
                store_buffers: names(&["o_device"]),
                aliases: names(&["pv_tile"]),
                stores_every_tile: false,
                compute_label: ComputeLabel::OldestPending,
            },
        }
    }
}
