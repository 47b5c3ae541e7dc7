//! Matching issue events with completion events
//!
//! Pairing runs per core in two phases:
//! 1. Events carrying an instruction id are grouped by id and matched by
//!    position inside each group, so ids repeated across loop iterations
//!    pair in order.
//! 2. Events without an id are matched by file order; if the two logs
//!    disagree on their count, both sides are truncated to the shorter one.
//!
//! Phase 2 assumes both logs emit id-less events in lock-step. A target
//! whose logs reorder id-less events cannot be paired reliably this way.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::stage::Core;

/// Non-fatal pairing problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingDiagnostic {
    /// Id-carrying events left without a partner
    UnmatchedIds { core: Core, start: usize, end: usize },
    /// Id-less event counts differ; both sides truncated to `kept`
    LengthMismatch {
        core: Core,
        start: usize,
        end: usize,
        kept: usize,
    },
}

impl std::fmt::Display for PairingDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingDiagnostic::UnmatchedIds { core, start, end } => write!(
                f,
                "{}: unmatched events with id after id-based pairing: start={} end={}",
                core, start, end
            ),
            PairingDiagnostic::LengthMismatch {
                core,
                start,
                end,
                kept,
            } => write!(
                f,
                "{}: unmatched start/end after id pairing: start={} end={}; truncating to {}",
                core, start, end, kept
            ),
        }
    }
}

/// Result of pairing: `(issue, completion)` events plus diagnostics
#[derive(Debug, Clone, Default)]
pub struct Pairing {
    pub pairs: Vec<(Event, Event)>,
    pub diagnostics: Vec<PairingDiagnostic>,
}

/// Matches issue-log events against completion-log events
pub struct EventPairer {
    starts: Vec<Option<Event>>,
    ends: Vec<Option<Event>>,
}

impl EventPairer {
    /// Pair events of any mix of cores; pairs never cross cores
    pub fn pair(starts: Vec<Event>, ends: Vec<Event>) -> Pairing {
        let mut result = Pairing::default();
        for core in Core::ALL {
            let s: Vec<Event> = starts.iter().filter(|e| e.core == core).cloned().collect();
            let e: Vec<Event> = ends.iter().filter(|e| e.core == core).cloned().collect();
            if s.is_empty() && e.is_empty() {
                continue;
            }
            let part = EventPairer::new(s, e).run(core);
            result.pairs.extend(part.pairs);
            result.diagnostics.extend(part.diagnostics);
        }
        result
    }

    fn new(starts: Vec<Event>, ends: Vec<Event>) -> Self {
        Self {
            starts: starts.into_iter().map(Some).collect(),
            ends: ends.into_iter().map(Some).collect(),
        }
    }

    fn run(mut self, core: Core) -> Pairing {
        let mut pairs = Vec::new();
        let mut diagnostics = Vec::new();

        // Phase 1: by id, groups visited in issue-log order
        let (id_order, starts_by_id) = group_by_id(&self.starts);
        let (_, ends_by_id) = group_by_id(&self.ends);
        for id in &id_order {
            let Some(end_idx) = ends_by_id.get(id) else {
                continue;
            };
            for (&s, &e) in starts_by_id[id].iter().zip(end_idx) {
                if let (Some(start), Some(end)) = (self.starts[s].take(), self.ends[e].take()) {
                    pairs.push((start, end));
                }
            }
        }

        let unmatched_start = count_with_id(&self.starts);
        let unmatched_end = count_with_id(&self.ends);
        if unmatched_start > 0 || unmatched_end > 0 {
            let diag = PairingDiagnostic::UnmatchedIds {
                core,
                start: unmatched_start,
                end: unmatched_end,
            };
            log::warn!("{}", diag);
            diagnostics.push(diag);
        }

        // Phase 2: remaining id-less events in file order
        let rem_start: Vec<Event> = take_without_id(&mut self.starts);
        let rem_end: Vec<Event> = take_without_id(&mut self.ends);
        if rem_start.len() != rem_end.len() {
            let diag = PairingDiagnostic::LengthMismatch {
                core,
                start: rem_start.len(),
                end: rem_end.len(),
                kept: rem_start.len().min(rem_end.len()),
            };
            log::warn!("{}", diag);
            diagnostics.push(diag);
        }
        pairs.extend(rem_start.into_iter().zip(rem_end));

        Pairing { pairs, diagnostics }
    }
}

fn group_by_id(events: &[Option<Event>]) -> (Vec<u64>, HashMap<u64, Vec<usize>>) {
    let mut order = Vec::new();
    let mut groups: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, ev) in events.iter().enumerate() {
        if let Some(id) = ev.as_ref().and_then(|e| e.id) {
            groups
                .entry(id)
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(i);
        }
    }
    (order, groups)
}

fn count_with_id(events: &[Option<Event>]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Some(ev) if ev.id.is_some()))
        .count()
}

fn take_without_id(events: &mut [Option<Event>]) -> Vec<Event> {
    events
        .iter_mut()
        .filter(|e| matches!(e, Some(ev) if ev.id.is_none()))
        .filter_map(Option::take)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(core: Core, ts: u64, id: Option<u64>) -> Event {
        Event {
            timestamp: ts,
            pc: None,
            pipeline: "MTE2".to_string(),
            opcode: "MOV_OUT_TO_L1".to_string(),
            operands: Vec::new(),
            core,
            raw_line: String::new(),
            line_number: ts as usize,
            id,
        }
    }

    #[test]
    fn test_unique_ids_pair_completely() {
        for n in [0usize, 1, 10, 1000] {
            let starts: Vec<Event> = (0..n).map(|i| ev(Core::Cube, i as u64, Some(i as u64))).collect();
            // Completion order differs from issue order
            let ends: Vec<Event> = (0..n)
                .rev()
                .map(|i| ev(Core::Cube, 5000 + i as u64, Some(i as u64)))
                .collect();
            let pairing = EventPairer::pair(starts, ends);
            assert_eq!(pairing.pairs.len(), n);
            assert!(pairing.diagnostics.is_empty());
            for (s, e) in &pairing.pairs {
                assert_eq!(s.id, e.id);
                assert_eq!(e.timestamp, 5000 + s.timestamp);
            }
        }
    }

    #[test]
    fn test_repeated_ids_pair_in_order() {
        let starts = vec![ev(Core::Cube, 1, Some(7)), ev(Core::Cube, 2, Some(7))];
        let ends = vec![ev(Core::Cube, 10, Some(7)), ev(Core::Cube, 20, Some(7))];
        let pairing = EventPairer::pair(starts, ends);
        let ts: Vec<(u64, u64)> = pairing
            .pairs
            .iter()
            .map(|(s, e)| (s.timestamp, e.timestamp))
            .collect();
        assert_eq!(ts, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn test_unmatched_ids_reported() {
        let starts = vec![ev(Core::Cube, 1, Some(1)), ev(Core::Cube, 2, Some(2))];
        let ends = vec![ev(Core::Cube, 10, Some(1)), ev(Core::Cube, 11, Some(3))];
        let pairing = EventPairer::pair(starts, ends);
        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(
            pairing.diagnostics,
            vec![PairingDiagnostic::UnmatchedIds {
                core: Core::Cube,
                start: 1,
                end: 1
            }]
        );
    }

    #[test]
    fn test_positional_truncates() {
        let starts = vec![
            ev(Core::Vector, 1, None),
            ev(Core::Vector, 2, None),
            ev(Core::Vector, 3, None),
        ];
        let ends = vec![ev(Core::Vector, 5, None), ev(Core::Vector, 1, None)];
        let pairing = EventPairer::pair(starts, ends);
        assert_eq!(pairing.pairs.len(), 2);
        // End before start is tolerated
        assert_eq!(pairing.pairs[1].0.timestamp, 2);
        assert_eq!(pairing.pairs[1].1.timestamp, 1);
        assert_eq!(
            pairing.diagnostics,
            vec![PairingDiagnostic::LengthMismatch {
                core: Core::Vector,
                start: 3,
                end: 2,
                kept: 2
            }]
        );
    }

    #[test]
    fn test_pairs_never_cross_cores() {
        let starts = vec![ev(Core::Cube, 1, None), ev(Core::Vector, 2, None)];
        let ends = vec![ev(Core::Vector, 3, None), ev(Core::Cube, 4, None)];
        let pairing = EventPairer::pair(starts, ends);
        assert_eq!(pairing.pairs.len(), 2);
        for (s, e) in &pairing.pairs {
            assert_eq!(s.core, e.core);
        }
        assert!(pairing.diagnostics.is_empty());
    }

    #[test]
    fn test_mixed_id_and_positional() {
        let starts = vec![ev(Core::Cube, 1, Some(9)), ev(Core::Cube, 2, None)];
        let ends = vec![ev(Core::Cube, 3, None), ev(Core::Cube, 4, Some(9))];
        let pairing = EventPairer::pair(starts, ends);
        let ts: Vec<(u64, u64)> = pairing
            .pairs
            .iter()
            .map(|(s, e)| (s.timestamp, e.timestamp))
            .collect();
        assert_eq!(ts, vec![(1, 4), (2, 3)]);
    }
}
