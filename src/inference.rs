//! Stage and loop-index inference over a time-ordered instruction stream
//!
//! Inference runs in two forward passes over instructions sorted by
//! `(ts_start, core)`:
//!
//! 1. Compute instructions get a stage. Loads, stores and computes that
//!    touch a stage buffer already carry one from buffer correlation.
//!    - On a core with a windowed stage (vector `p`), a compute inside a
//!      `[load end, store start)` window of that stage belongs to it. Past
//!      the first stage-tagged load, anything else belongs to the core's
//!      accumulating stage (`gu`).
//!    - Elsewhere (cube) a compute is bracketed by the nearest preceding
//!      trigger load and the nearest following stage-tagged store on the
//!      same core. If they agree that stage wins, otherwise the store's.
//!
//!    What no rule resolves is tagged `Unknown`.
//! 2. Every staged instruction gets a loop-indexed name from the
//!    [`LoopTracker`] of its `(core, stage)`.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::classify::OpClass;
use crate::instr::{Instr, StageTag};
use crate::stage::{ComputeLabel, Core, StageKind, StageModel, StageSpec};

/// Load-side phase of a stage's current loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopPhase {
    /// Every opened loop has been stored
    AwaitingLoad,
    /// Loads of the next loop seen, trigger policy not yet satisfied
    LoopOpen { seen: BTreeSet<String> },
    /// Loop opened, its stores still outstanding
    AwaitingStore,
}

/// Loop bookkeeping for one `(core, stage)`
#[derive(Debug, Clone)]
pub struct LoopTracker {
    stage: StageKind,
    phase: LoopPhase,
    current: usize,
    last_retired: Option<usize>,
    /// Opened loops whose compute has not been seen yet
    pending: VecDeque<usize>,
    last_computed: Option<usize>,
    store_counter: usize,
    compute_counter: usize,
}

impl LoopTracker {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            phase: LoopPhase::AwaitingLoad,
            current: 0,
            last_retired: None,
            pending: VecDeque::new(),
            last_computed: None,
            store_counter: 0,
            compute_counter: 0,
        }
    }

    pub fn phase(&self) -> &LoopPhase {
        &self.phase
    }

    /// Index the next label load is named with
    pub fn current(&self) -> usize {
        self.current
    }

    /// Index of the most recently opened loop
    pub fn last_retired(&self) -> Option<usize> {
        self.last_retired
    }

    pub fn store_counter(&self) -> usize {
        self.store_counter
    }

    fn name(&self, index: usize) -> String {
        format!("{}{}", self.stage.abbr(), index)
    }

    pub fn on_load(&mut self, spec: &StageSpec, buffer: &str) -> Option<String> {
        let name = spec.is_label(buffer).then(|| self.name(self.current));
        if spec.is_trigger(buffer) {
            self.see_trigger(spec, buffer);
        } else if name.is_some() && self.phase == LoopPhase::AwaitingLoad {
            self.phase = LoopPhase::LoopOpen {
                seen: BTreeSet::new(),
            };
        }
        name
    }

    fn see_trigger(&mut self, spec: &StageSpec, buffer: &str) {
        let mut seen = match std::mem::replace(&mut self.phase, LoopPhase::AwaitingLoad) {
            LoopPhase::LoopOpen { seen } => seen,
            _ => BTreeSet::new(),
        };
        seen.insert(buffer.to_ascii_lowercase());
        let satisfied = !spec.require_all
            || spec
                .trigger_loads
                .iter()
                .all(|t| seen.contains(&t.to_ascii_lowercase()));
        if !satisfied {
            self.phase = LoopPhase::LoopOpen { seen };
            return;
        }
        self.last_retired = Some(self.current);
        if spec.compute_label == ComputeLabel::OldestPending {
            self.pending.push_back(self.current);
        }
        self.current += 1;
        self.phase = if spec.stores_every_tile {
            LoopPhase::AwaitingStore
        } else {
            LoopPhase::AwaitingLoad
        };
    }

    pub fn on_compute(&mut self, spec: &StageSpec) -> Option<String> {
        match spec.compute_label {
            ComputeLabel::Sequential => {
                let index = self.compute_counter;
                self.compute_counter += 1;
                Some(self.name(index))
            }
            ComputeLabel::StoreCounter => Some(self.name(self.store_counter)),
            ComputeLabel::OldestPending => {
                if let Some(index) = self.pending.pop_front() {
                    self.last_computed = Some(index);
                }
                self.last_computed.or(self.last_retired).map(|i| self.name(i))
            }
        }
    }

    pub fn on_store(&mut self, spec: &StageSpec) -> Option<String> {
        if !spec.stores_every_tile {
            return self.last_retired.map(|i| self.name(i));
        }
        let index = self.store_counter;
        self.store_counter += 1;
        if self.phase == LoopPhase::AwaitingStore && self.store_counter >= self.current {
            self.phase = LoopPhase::AwaitingLoad;
        }
        Some(self.name(index))
    }
}

/// Counts after an inference pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceSummary {
    pub staged: usize,
    pub unknown: usize,
    pub named: usize,
}

/// Assigns `stage` and `stage_name` to classified instructions
pub struct StageInferencer<'a> {
    model: &'a StageModel,
}

impl<'a> StageInferencer<'a> {
    pub fn new(model: &'a StageModel) -> Self {
        Self { model }
    }

    /// `instrs` must be sorted by `(ts_start, core)`
    pub fn infer(&self, instrs: &mut [Instr]) -> InferenceSummary {
        self.assign_compute_stages(instrs);
        self.assign_stage_names(instrs);

        let mut summary = InferenceSummary::default();
        for ins in instrs.iter() {
            match ins.stage {
                Some(StageTag::Stage(_)) => summary.staged += 1,
                Some(StageTag::Unknown) => summary.unknown += 1,
                None => {}
            }
            if ins.stage_name.is_some() {
                summary.named += 1;
            }
        }
        log::debug!(
            "inference: {} staged, {} unknown, {} named",
            summary.staged,
            summary.unknown,
            summary.named
        );
        summary
    }

    fn assign_compute_stages(&self, instrs: &mut [Instr]) {
        let view: &[Instr] = instrs;
        let windows: HashMap<Core, Vec<(u64, u64)>> = Core::ALL
            .into_iter()
            .filter_map(|core| {
                let stage = self.model.window_stage(core)?;
                Some((core, stage_windows(view, core, stage)))
            })
            .collect();

        // Nearest following stage-tagged store, per core
        let mut next_store: Vec<Option<StageKind>> = vec![None; instrs.len()];
        let mut upcoming: HashMap<Core, StageKind> = HashMap::new();
        for (i, ins) in instrs.iter().enumerate().rev() {
            next_store[i] = upcoming.get(&ins.core).copied();
            if ins.op_class == OpClass::Store {
                if let Some(kind) = ins.stage_kind() {
                    upcoming.insert(ins.core, kind);
                }
            }
        }

        let mut last_trigger: HashMap<Core, StageKind> = HashMap::new();
        let mut staged_load_seen: HashMap<Core, bool> = HashMap::new();
        for (i, ins) in instrs.iter_mut().enumerate() {
            match ins.op_class {
                OpClass::Load => {
                    if let Some(kind) = ins.stage_kind() {
                        staged_load_seen.insert(ins.core, true);
                        let is_trigger = ins
                            .buffer
                            .as_deref()
                            .map_or(false, |b| self.model.spec(kind).is_trigger(b));
                        if is_trigger {
                            last_trigger.insert(ins.core, kind);
                        }
                    }
                }
                OpClass::Compute if ins.stage.is_none() => {
                    let tag = match self.model.window_stage(ins.core) {
                        Some(window_stage) => {
                            let in_window = windows
                                .get(&ins.core)
                                .map_or(false, |w| w.iter().any(|&(s, e)| s <= ins.ts_start && ins.ts_start < e));
                            if in_window {
                                StageTag::Stage(window_stage)
                            } else if staged_load_seen.get(&ins.core).copied().unwrap_or(false) {
                                self.model
                                    .accumulating_stage(ins.core)
                                    .map_or(StageTag::Unknown, StageTag::Stage)
                            } else {
                                StageTag::Unknown
                            }
                        }
                        None => bracket(last_trigger.get(&ins.core).copied(), next_store[i]),
                    };
                    log::trace!("{} compute {} @{} -> {}", ins.core, ins.opcode, ins.ts_start, tag);
                    ins.stage = Some(tag);
                }
                _ => {}
            }
        }
    }

    fn assign_stage_names(&self, instrs: &mut [Instr]) {
        let mut trackers: HashMap<(Core, StageKind), LoopTracker> = HashMap::new();
        for ins in instrs.iter_mut() {
            let Some(kind) = ins.stage_kind() else {
                continue;
            };
            let spec = self.model.spec(kind);
            let tracker = trackers
                .entry((ins.core, kind))
                .or_insert_with(|| LoopTracker::new(kind));
            let name = match ins.op_class {
                OpClass::Load => ins.buffer.as_deref().and_then(|b| tracker.on_load(spec, b)),
                OpClass::Compute => tracker.on_compute(spec),
                OpClass::Store => tracker.on_store(spec),
                OpClass::Sync | OpClass::Other => None,
            };
            ins.stage_name = name;
        }
    }
}

/// `[load end, store start)` windows of `stage`, zipping loads and stores in time order
fn stage_windows(instrs: &[Instr], core: Core, stage: StageKind) -> Vec<(u64, u64)> {
    let loads = staged(instrs, core, stage, OpClass::Load);
    let stores = staged(instrs, core, stage, OpClass::Store);
    loads
        .iter()
        .zip(stores.iter())
        .map(|(l, s)| (l.end(), s.ts_start))
        .collect()
}

fn staged(instrs: &[Instr], core: Core, stage: StageKind, class: OpClass) -> Vec<&Instr> {
    let mut v: Vec<&Instr> = instrs
        .iter()
        .filter(|i| i.core == core && i.op_class == class && i.stage_kind() == Some(stage))
        .collect();
    v.sort_by_key(|i| i.ts_start);
    v
}

fn bracket(prev_load: Option<StageKind>, next_store: Option<StageKind>) -> StageTag {
    match (prev_load, next_store) {
        (Some(l), Some(s)) if l == s => StageTag::Stage(l),
        (_, Some(s)) => StageTag::Stage(s),
        _ => StageTag::Unknown,
    }
}
