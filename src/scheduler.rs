//! Greedy forward scheduler for the qk -> p -> pv -> gu tile pipeline
//!
//! Every stage iteration is split into load, compute and store sub-tasks on
//! its core. Tiles are issued in increasing order; `qk`/`p` of a tile are
//! issued immediately while `pv`/`gu` wait in a FIFO until `preload` newer
//! tiles have had their `qk`/`p` issued. Resources are granted strictly in
//! request order, so identical parameters always yield identical timelines.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::resource::{Port, ResourceTimeline};
use crate::stage::{Stage, StageKind};
use crate::task::{Role, Task};

/// Compute cycles per stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCosts {
    pub qk: u64,
    pub p: u64,
    pub pv: u64,
    pub gu: u64,
}

impl CycleCosts {
    pub fn new(qk: u64, p: u64, pv: u64, gu: u64) -> Self {
        Self { qk, p, pv, gu }
    }

    pub fn of(&self, stage: StageKind) -> u64 {
        match stage {
            StageKind::Qk => self.qk,
            StageKind::P => self.p,
            StageKind::Pv => self.pv,
            StageKind::Gu => self.gu,
        }
    }
}

impl Default for CycleCosts {
    fn default() -> Self {
        Self::new(10, 16, 10, 6)
    }
}

/// Scheduler inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParams {
    pub tiles: usize,
    /// Tiles of qk/p issued ahead of the oldest pending pv
    pub preload: usize,
    pub cycles: CycleCosts,
    pub io_load: u64,
    pub io_store: u64,
}

impl ScheduleParams {
    pub fn new(tiles: usize, preload: usize, cycles: CycleCosts, io_load: u64, io_store: u64) -> Self {
        Self {
            tiles,
            preload,
            cycles,
            io_load,
            io_store,
        }
    }

    fn stage(&self, kind: StageKind) -> Stage {
        Stage::new(kind, self.cycles.of(kind))
    }
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self::new(10, 0, CycleCosts::default(), 10, 10)
    }
}

/// Forward scheduler over a caller-owned resource timeline
pub struct ForwardScheduler {
    params: ScheduleParams,
}

impl ForwardScheduler {
    pub fn new(params: ScheduleParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ScheduleParams {
        &self.params
    }

    /// Simulate the whole pipeline, returning tasks in issue order
    pub fn run(&self, timeline: &mut ResourceTimeline) -> Vec<Task> {
        let tiles = self.params.tiles;
        let preload = self.params.preload.min(tiles);
        let mut tasks = Vec::with_capacity(tiles * 12);
        let mut p_done = vec![0u64; tiles];
        let mut pv_wait: VecDeque<usize> = VecDeque::new();

        for tile in 0..tiles {
            let qk_done = self.issue(tile, StageKind::Qk, 0, true, timeline, &mut tasks);
            p_done[tile] = self.issue(tile, StageKind::P, qk_done, true, timeline, &mut tasks);
            pv_wait.push_back(tile);

            if pv_wait.len() > preload {
                if let Some(oldest) = pv_wait.pop_front() {
                    self.issue_tail(oldest, p_done[oldest], timeline, &mut tasks);
                }
            }
        }

        while let Some(oldest) = pv_wait.pop_front() {
            self.issue_tail(oldest, p_done[oldest], timeline, &mut tasks);
        }

        log::debug!(
            "scheduled {} tiles (preload {}) into {} tasks",
            tiles,
            preload,
            tasks.len()
        );
        tasks
    }

    /// pv then gu of one tile; gu stores only for the globally last tile
    fn issue_tail(
        &self,
        tile: usize,
        p_done: u64,
        timeline: &mut ResourceTimeline,
        tasks: &mut Vec<Task>,
    ) {
        let pv_done = self.issue(tile, StageKind::Pv, p_done, true, timeline, tasks);
        let last = tile + 1 == self.params.tiles;
        self.issue(tile, StageKind::Gu, pv_done, last, timeline, tasks);
    }

    /// Schedule load/compute[/store] of one stage iteration.
    ///
    /// Returns the time the iteration's output is available: the store end,
    /// or the compute end when the store is omitted.
    fn issue(
        &self,
        tile: usize,
        kind: StageKind,
        dep_ready: u64,
        with_store: bool,
        timeline: &mut ResourceTimeline,
        tasks: &mut Vec<Task>,
    ) -> u64 {
        let stage = self.params.stage(kind);
        let core = stage.core;

        let ready = dep_ready.max(timeline.free_at(core, Port::Load));
        let load_start = timeline.admit(kind, ready);
        let load = timeline.reserve_load(core, load_start, self.params.io_load);
        tasks.push(Task::new(kind, Role::Load(0), tile, load.start, load.end));

        let comp = timeline.reserve_compute(core, load.end, stage.cycles);
        timeline.hold(kind, comp.end);
        tasks.push(Task::new(kind, Role::Compute, tile, comp.start, comp.end));

        if !with_store {
            return comp.end;
        }

        let store = timeline.reserve_store(core, comp.end, self.params.io_store);
        tasks.push(Task::new(kind, Role::Store, tile, store.start, store.end));
        store.end
    }
}

/// Convenience wrapper running a fresh timeline
pub fn schedule(
    num_tiles: usize,
    preload: usize,
    cycles: CycleCosts,
    io_load: u64,
    io_store: u64,
) -> Vec<Task> {
    let params = ScheduleParams::new(num_tiles, preload, cycles, io_load, io_store);
    ForwardScheduler::new(params).run(&mut ResourceTimeline::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Core;
    use pretty_assertions::assert_eq;

    fn example() -> Vec<Task> {
        schedule(3, 1, CycleCosts::new(10, 16, 10, 6), 10, 10)
    }

    fn find<'a>(tasks: &'a [Task], label: &str, tile: usize) -> Option<&'a Task> {
        tasks.iter().find(|t| t.label == label && t.tile == tile)
    }

    fn span(tasks: &[Task], label: &str, tile: usize) -> (u64, u64) {
        let t = find(tasks, label, tile).unwrap();
        (t.start, t.end)
    }

    #[test]
    fn test_zero_tiles() {
        assert!(schedule(0, 3, CycleCosts::default(), 10, 10).is_empty());
    }

    #[test]
    fn test_reference_example() {
        let tasks = example();
        assert_eq!(span(&tasks, "qk_load0", 0), (0, 10));
        assert_eq!(span(&tasks, "qk_comp", 0), (10, 20));
        assert_eq!(span(&tasks, "qk_store", 0), (20, 30));

        assert_eq!(span(&tasks, "p_load0", 0), (30, 40));
        assert_eq!(span(&tasks, "p_comp", 0), (40, 56));
        assert_eq!(span(&tasks, "p_store", 0), (56, 66));

        // pv(0) waits for p(0)'s store and for tile 1's p to be issued
        assert_eq!(span(&tasks, "pv_load0", 0), (66, 76));
        let pv0 = tasks.iter().position(|t| t.label == "pv_load0" && t.tile == 0).unwrap();
        let p1 = tasks.iter().position(|t| t.label == "p_store" && t.tile == 1).unwrap();
        assert!(p1 < pv0);

        assert_eq!(span(&tasks, "gu_comp", 2), (182, 188));
        assert_eq!(span(&tasks, "gu_store", 2), (188, 198));
    }

    #[test]
    fn test_gu_store_only_on_last_tile() {
        let tasks = example();
        assert!(find(&tasks, "gu_store", 0).is_none());
        assert!(find(&tasks, "gu_store", 1).is_none());
        assert!(find(&tasks, "gu_store", 2).is_some());
        // 4 stages * 3 sub-tasks per tile, minus the omitted gu stores
        assert_eq!(tasks.len(), 3 * 12 - 2);
    }

    #[test]
    fn test_deterministic() {
        for tiles in 1..=50 {
            for preload in 0..=tiles {
                let a = schedule(tiles, preload, CycleCosts::default(), 10, 10);
                let b = schedule(tiles, preload, CycleCosts::default(), 10, 10);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_no_overlap_per_resource() {
        for tiles in 1..=20 {
            for preload in 0..=tiles {
                let tasks = schedule(tiles, preload, CycleCosts::new(7, 23, 5, 3), 4, 9);
                for core in Core::ALL {
                    for lane in 0..3 {
                        let mut spans: Vec<&Task> = tasks
                            .iter()
                            .filter(|t| t.core == core && t.role.lane() == lane)
                            .collect();
                        spans.sort_by_key(|t| t.start);
                        for w in spans.windows(2) {
                            assert!(
                                w[0].end <= w[1].start,
                                "{} overlaps {} (tiles={}, preload={})",
                                w[0],
                                w[1],
                                tiles,
                                preload
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_dependency_ordering() {
        for tiles in 1..=20 {
            for preload in 0..=tiles {
                let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
                for i in 0..tiles {
                    for (producer, consumer) in [("qk", "p"), ("p", "pv"), ("pv", "gu")] {
                        let store = find(&tasks, &format!("{}_store", producer), i).unwrap();
                        let load = find(&tasks, &format!("{}_load0", consumer), i).unwrap();
                        assert!(store.end <= load.start);
                    }
                    let load = find(&tasks, "qk_load0", i).unwrap();
                    let comp = find(&tasks, "qk_comp", i).unwrap();
                    assert!(load.end <= comp.start);
                }
            }
        }
    }

    #[test]
    fn test_preload_monotonic() {
        for tiles in 1..=20 {
            let mut last = 0;
            for preload in 0..=tiles + 2 {
                let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
                let pv0 = find(&tasks, "pv_load0", 0).unwrap().start;
                assert!(pv0 >= last, "tiles={} preload={}", tiles, preload);
                last = pv0;
            }
        }
    }

    #[test]
    fn test_preload_clamped() {
        let a = schedule(4, 4, CycleCosts::default(), 10, 10);
        let b = schedule(4, 100, CycleCosts::default(), 10, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_runs_against_caller_timeline() {
        let mut timeline = ResourceTimeline::new();
        let params = ScheduleParams::new(2, 0, CycleCosts::default(), 10, 10);
        let tasks = ForwardScheduler::new(params).run(&mut timeline);
        let last_cube_store = tasks
            .iter()
            .filter(|t| t.core == Core::Cube && t.role == Role::Store)
            .map(|t| t.end)
            .max()
            .unwrap();
        assert_eq!(timeline.free_at(Core::Cube, Port::Store), last_cube_store);
    }
}
