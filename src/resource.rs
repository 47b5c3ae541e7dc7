//! Per-core resource occupancy for the forward scheduler
//!
//! Each core has three independently serialized resources (load port,
//! compute unit, store port) tracked as "free at" counters. Each stage also
//! owns a bounded ping-pong queue of compute completions that limits how far
//! its loads may run ahead of its compute.

use std::collections::VecDeque;

use crate::stage::{Core, StageKind};

/// Ping-pong buffer depth of the reference target
pub const DEFAULT_PINGPONG_DEPTH: usize = 2;

/// A granted reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

/// Resource type on a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Load,
    Compute,
    Store,
}

#[derive(Debug, Clone, Default)]
struct CoreCounters {
    load_free: u64,
    compute_free: u64,
    store_free: u64,
}

impl CoreCounters {
    fn slot(&mut self, port: Port) -> &mut u64 {
        match port {
            Port::Load => &mut self.load_free,
            Port::Compute => &mut self.compute_free,
            Port::Store => &mut self.store_free,
        }
    }
}

/// Outstanding (issued but unretired) compute completions of one stage
#[derive(Debug, Clone)]
pub struct PingPongQueue {
    depth: usize,
    pending: VecDeque<u64>,
}

impl PingPongQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            pending: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.depth
    }

    pub fn oldest(&self) -> Option<u64> {
        self.pending.front().copied()
    }

    /// Drop completions at or before `before`
    pub fn retire(&mut self, before: u64) {
        while matches!(self.pending.front(), Some(&done) if done <= before) {
            self.pending.pop_front();
        }
    }

    /// Record a completion, keeping the queue ordered by completion time
    pub fn push(&mut self, done: u64) {
        let pos = self.pending.partition_point(|&t| t <= done);
        self.pending.insert(pos, done);
    }
}

/// Free-time counters for both cores plus the per-stage ping-pong queues
#[derive(Debug, Clone)]
pub struct ResourceTimeline {
    cube: CoreCounters,
    vector: CoreCounters,
    queues: [PingPongQueue; 4],
}

impl ResourceTimeline {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_PINGPONG_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            cube: CoreCounters::default(),
            vector: CoreCounters::default(),
            queues: std::array::from_fn(|_| PingPongQueue::new(depth)),
        }
    }

    fn counters(&mut self, core: Core) -> &mut CoreCounters {
        match core {
            Core::Cube => &mut self.cube,
            Core::Vector => &mut self.vector,
        }
    }

    fn queue_index(stage: StageKind) -> usize {
        match stage {
            StageKind::Qk => 0,
            StageKind::P => 1,
            StageKind::Pv => 2,
            StageKind::Gu => 3,
        }
    }

    /// Current free time of a resource
    pub fn free_at(&self, core: Core, port: Port) -> u64 {
        let c = match core {
            Core::Cube => &self.cube,
            Core::Vector => &self.vector,
        };
        match port {
            Port::Load => c.load_free,
            Port::Compute => c.compute_free,
            Port::Store => c.store_free,
        }
    }

    pub fn queue(&self, stage: StageKind) -> &PingPongQueue {
        &self.queues[Self::queue_index(stage)]
    }

    /// Grant `cycles` on a resource no earlier than `ready` or its free time
    pub fn reserve(&mut self, core: Core, port: Port, ready: u64, cycles: u64) -> Span {
        let slot = self.counters(core).slot(port);
        let start = ready.max(*slot);
        let end = start + cycles;
        *slot = end;
        Span { start, end }
    }

    pub fn reserve_load(&mut self, core: Core, ready: u64, cycles: u64) -> Span {
        self.reserve(core, Port::Load, ready, cycles)
    }

    pub fn reserve_compute(&mut self, core: Core, ready: u64, cycles: u64) -> Span {
        self.reserve(core, Port::Compute, ready, cycles)
    }

    pub fn reserve_store(&mut self, core: Core, ready: u64, cycles: u64) -> Span {
        self.reserve(core, Port::Store, ready, cycles)
    }

    /// Drop a stage's completed ping-pong entries
    pub fn retire(&mut self, stage: StageKind, before: u64) {
        self.queues[Self::queue_index(stage)].retire(before);
    }

    /// Earliest load start at or after `candidate` with a free ping-pong slot
    pub fn admit(&mut self, stage: StageKind, candidate: u64) -> u64 {
        let queue = &mut self.queues[Self::queue_index(stage)];
        let mut start = candidate;
        queue.retire(start);
        while queue.is_full() {
            if let Some(oldest) = queue.oldest() {
                start = start.max(oldest);
            }
            queue.retire(start);
        }
        start
    }

    /// Mark a compute result as in flight until `done`
    pub fn hold(&mut self, stage: StageKind, done: u64) {
        self.queues[Self::queue_index(stage)].push(done);
    }
}

impl Default for ResourceTimeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservations_are_monotonic() {
        let mut rt = ResourceTimeline::new();
        let a = rt.reserve_load(Core::Cube, 0, 10);
        assert_eq!(a, Span { start: 0, end: 10 });
        // Ready earlier than the port: waits for the port
        let b = rt.reserve_load(Core::Cube, 5, 10);
        assert_eq!(b, Span { start: 10, end: 20 });
        // Ready later than the port: waits for the caller
        let c = rt.reserve_load(Core::Cube, 42, 1);
        assert_eq!(c, Span { start: 42, end: 43 });
        assert_eq!(rt.free_at(Core::Cube, Port::Load), 43);
    }

    #[test]
    fn test_cores_and_ports_are_independent() {
        let mut rt = ResourceTimeline::new();
        rt.reserve_compute(Core::Cube, 0, 100);
        assert_eq!(rt.reserve_compute(Core::Vector, 0, 5).start, 0);
        assert_eq!(rt.reserve_store(Core::Cube, 0, 5).start, 0);
        assert_eq!(rt.reserve_compute(Core::Cube, 0, 5).start, 100);
    }

    #[test]
    fn test_pingpong_blocks_third_load() {
        let mut rt = ResourceTimeline::new();
        rt.hold(StageKind::P, 50);
        rt.hold(StageKind::P, 80);
        // Both slots busy: a load at 10 must wait for the oldest completion
        assert_eq!(rt.admit(StageKind::P, 10), 50);
        assert_eq!(rt.queue(StageKind::P).len(), 1);
        // Other stages are unaffected
        assert_eq!(rt.admit(StageKind::Qk, 10), 10);
    }

    #[test]
    fn test_retire_drops_completed_entries() {
        let mut q = PingPongQueue::new(2);
        q.push(30);
        q.push(20);
        assert_eq!(q.oldest(), Some(20));
        q.retire(20);
        assert_eq!(q.oldest(), Some(30));
        q.retire(29);
        assert_eq!(q.len(), 1);
        q.retire(30);
        assert!(q.is_empty());
    }
}
