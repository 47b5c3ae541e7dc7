//! Synthetic instruction logs from a schedule
//!
//! Renders issue and completion lines for every sub-task in the raw log
//! shape the reconstructor consumes, together with a device manifest
//! covering every buffer the lines reference. Loads touch their stage's
//! first trigger buffer, computes a buffer that correlates back to their
//! stage, stores the first store buffer.

use std::collections::HashMap;
use std::path::Path;

use crate::buffers::BufferMap;
use crate::error::{TimelineError, TimelineResult};
use crate::export::write_text;
use crate::stage::{Core, StageKind, StageModel, StageSpec};
use crate::task::{Role, Task};
use crate::TraceLogs;

const BUFFER_BASE: u64 = 0x1000_0000;
const BUFFER_SIZE: u64 = 0x10_0000;
const TILE_STRIDE: u64 = 0x400;
const PC_BASE: u64 = 0x1000;

/// File names used by [`SyntheticLogs::write_to`]
pub const CUBE_START_LOG: &str = "cube_start.log";
pub const CUBE_END_LOG: &str = "cube_end.log";
pub const VECTOR_START_LOG: &str = "vec_start.log";
pub const VECTOR_END_LOG: &str = "vec_end.log";
pub const MANIFEST_FILE: &str = "device_addrs.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthOptions {
    /// Append `id=` to every line; without ids completion lines keep issue
    /// order so positional pairing lines up
    pub with_ids: bool,
    /// Give compute lines an operand in their stage's buffer
    pub compute_buffers: bool,
    /// Split each load into one line per label buffer, trigger last
    pub split_loads: bool,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            with_ids: true,
            compute_buffers: true,
            split_loads: false,
        }
    }
}

pub struct SyntheticLogs {
    pub logs: TraceLogs,
    pub manifest: BufferMap,
}

impl SyntheticLogs {
    pub fn write_to(&self, dir: impl AsRef<Path>) -> TimelineResult<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| TimelineError::io(dir, e))?;
        write_text(dir.join(CUBE_START_LOG), &self.logs.cube_start)?;
        write_text(dir.join(CUBE_END_LOG), &self.logs.cube_end)?;
        write_text(dir.join(VECTOR_START_LOG), &self.logs.vector_start)?;
        write_text(dir.join(VECTOR_END_LOG), &self.logs.vector_end)?;
        write_text(dir.join(MANIFEST_FILE), &self.manifest.to_toml_string()?)
    }
}

fn instruction(stage: StageKind, role: Role) -> (&'static str, &'static str, &'static str) {
    // (pipeline, opcode, operand label)
    match (role, stage.core()) {
        (Role::Load(_), Core::Cube) => ("MTE2", "MOV_OUT_TO_L1", "XN"),
        (Role::Load(_), Core::Vector) => ("MTE2", "MOV_OUT_TO_UB", "XN"),
        (Role::Store, Core::Cube) => ("FIXP", "FIX_L0C_TO_OUT", "XD"),
        (Role::Store, Core::Vector) => ("MTE3", "MOV_UB_TO_OUT", "XD"),
        (Role::Compute, _) => match stage {
            StageKind::Qk | StageKind::Pv => ("CUBE", "MMAD", "XN"),
            StageKind::P => ("VEC", "VEXP", "XN"),
            StageKind::Gu => ("VEC", "VADD", "XN"),
        },
    }
}

/// Buffers one load sub-task of `kind` touches, in issue order
pub fn load_buffers(model: &StageModel, kind: StageKind, split: bool) -> Vec<String> {
    let spec = model.spec(kind);
    let trigger = spec.trigger_loads.first().or(spec.label_loads.first());
    let mut out: Vec<String> = Vec::new();
    if split {
        out.extend(
            spec.label_loads
                .iter()
                .filter(|b| !spec.is_trigger(b))
                .cloned(),
        );
    }
    out.extend(trigger.cloned());
    out
}

/// First alias that correlates back to `kind` on its core
fn compute_buffer<'m>(model: &'m StageModel, kind: StageKind, spec: &'m StageSpec) -> Option<&'m String> {
    spec.aliases
        .iter()
        .find(|b| model.correlate(kind.core(), b) == Some(kind))
}

/// `n` back-to-back pieces covering `[start, end)`
pub fn segments(start: u64, end: u64, n: usize) -> Vec<(u64, u64)> {
    let n = n.max(1) as u64;
    let span = end.saturating_sub(start);
    (0..n)
        .map(|j| (start + span * j / n, start + span * (j + 1) / n))
        .collect()
}

fn manifest_for(model: &StageModel) -> BufferMap {
    let mut map = BufferMap::new();
    let mut next = BUFFER_BASE;
    for (_, spec) in model.stages() {
        let names = spec
            .trigger_loads
            .iter()
            .chain(&spec.label_loads)
            .chain(&spec.store_buffers)
            .chain(&spec.aliases);
        for name in names {
            if map.get(name).is_none() {
                map.insert(name.clone(), next, BUFFER_SIZE);
                next += BUFFER_SIZE;
            }
        }
    }
    map
}

struct Entry {
    id: usize,
    start: u64,
    end: u64,
    body: String,
}

/// Render logs with the default [`SynthOptions`]
pub fn render_logs(tasks: &[Task], model: &StageModel) -> SyntheticLogs {
    render_logs_with(tasks, model, &SynthOptions::default())
}

pub fn render_logs_with(tasks: &[Task], model: &StageModel, opts: &SynthOptions) -> SyntheticLogs {
    let manifest = manifest_for(model);
    let mut per_core: HashMap<Core, Vec<Entry>> = HashMap::new();
    let mut id = 0usize;

    for task in tasks {
        let (pipe, opcode, label) = instruction(task.stage, task.role);
        let spec = model.spec(task.stage);
        let lines: Vec<(Option<String>, u64, u64)> = match task.role {
            Role::Load(_) => {
                let buffers = load_buffers(model, task.stage, opts.split_loads);
                let spans = segments(task.start, task.end, buffers.len());
                buffers
                    .into_iter()
                    .zip(spans)
                    .map(|(b, (s, e))| (Some(b), s, e))
                    .collect()
            }
            Role::Compute => {
                let buffer = opts
                    .compute_buffers
                    .then(|| compute_buffer(model, task.stage, spec).cloned())
                    .flatten();
                vec![(buffer, task.start, task.end)]
            }
            Role::Store => vec![(spec.store_buffers.first().cloned(), task.start, task.end)],
        };

        for (buffer, start, end) in lines {
            let mut body = format!(
                "PC: {:#x} ({}) {} : (1010 0110) {}",
                PC_BASE + 4 * id as u64,
                id % 8,
                pipe,
                opcode
            );
            if let Some(range) = buffer.as_deref().and_then(|b| manifest.get(b)) {
                let addr = range.base + (task.tile as u64 * TILE_STRIDE) % range.size.max(1);
                body.push_str(&format!(" {}:{:#x}", label, addr));
            }
            if opts.with_ids {
                body.push_str(&format!(" id={}", id));
            }
            per_core.entry(task.core).or_default().push(Entry { id, start, end, body });
            id += 1;
        }
    }

    let mut text = |core: Core, completion: bool| {
        let entries = per_core.entry(core).or_default();
        if completion && opts.with_ids {
            entries.sort_by_key(|e| (e.end, e.id));
        } else {
            entries.sort_by_key(|e| (e.start, e.id));
        }
        let mut out = String::new();
        for e in entries.iter() {
            let ts = if completion { e.end } else { e.start };
            out.push_str(&format!("[{}] {}\n", ts, e.body));
        }
        out
    };

    let logs = TraceLogs {
        cube_start: text(Core::Cube, false),
        cube_end: text(Core::Cube, true),
        vector_start: text(Core::Vector, false),
        vector_end: text(Core::Vector, true),
    };
    log::debug!("synthesized {} lines over {} buffers", id, manifest.len());
    SyntheticLogs { logs, manifest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetProfile;
    use crate::export::{diff, TimelineExporter};
    use crate::reconstruct;
    use crate::scheduler::{schedule, CycleCosts};
    use pretty_assertions::assert_eq;

    fn example() -> Vec<Task> {
        schedule(3, 1, CycleCosts::new(10, 16, 10, 6), 10, 10)
    }

    fn grid() -> impl Iterator<Item = (usize, usize)> {
        (1..=10).flat_map(|tiles| (0..=tiles).map(move |preload| (tiles, preload)))
    }

    fn round_trip(tasks: &[Task], opts: &SynthOptions) -> Vec<Task> {
        let synth = render_logs_with(tasks, &StageModel::default(), opts);
        let rec = reconstruct(&synth.logs, &synth.manifest, &TargetProfile::default());
        assert!(rec.diagnostics.is_empty(), "{:?}", rec.diagnostics);
        assert_eq!(rec.summary.unknown, 0);
        rec.tasks()
    }

    #[test]
    fn test_round_trip_grid() {
        for (tiles, preload) in grid() {
            let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
            let rec = round_trip(&tasks, &SynthOptions::default());
            let d = diff(&TimelineExporter::from_schedule(&tasks), &rec);
            assert!(d.is_identical(), "tiles={} preload={}: {}", tiles, preload, d);
        }
    }

    #[test]
    fn test_round_trip_grid_positional() {
        let opts = SynthOptions {
            with_ids: false,
            ..SynthOptions::default()
        };
        for (tiles, preload) in grid() {
            let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
            assert_eq!(
                round_trip(&tasks, &opts),
                TimelineExporter::from_schedule(&tasks),
                "tiles={} preload={}",
                tiles,
                preload
            );
        }
    }

    #[test]
    fn test_round_trip_other_costs() {
        let costs = [CycleCosts::new(5, 30, 5, 20), CycleCosts::new(40, 3, 40, 3)];
        for cycles in costs {
            for (tiles, preload) in [(4, 0), (6, 2), (8, 8)] {
                for (io_load, io_store) in [(1, 30), (30, 1)] {
                    let tasks = schedule(tiles, preload, cycles, io_load, io_store);
                    assert_eq!(
                        round_trip(&tasks, &SynthOptions::default()),
                        TimelineExporter::from_schedule(&tasks),
                        "{:?} tiles={} preload={}",
                        cycles,
                        tiles,
                        preload
                    );
                }
            }
        }
    }

    #[test]
    fn test_round_trip_without_compute_buffers() {
        // Compute stages from bracketing and windows alone; (4, 2) runs gu
        // loads ahead of gu computes
        let opts = SynthOptions {
            compute_buffers: false,
            ..SynthOptions::default()
        };
        for (tiles, preload) in [(1, 0), (3, 1), (4, 2)] {
            let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
            assert_eq!(
                round_trip(&tasks, &opts),
                TimelineExporter::from_schedule(&tasks),
                "tiles={} preload={}",
                tiles,
                preload
            );
        }
    }

    fn split_expected(tasks: &[Task], model: &StageModel) -> Vec<Task> {
        let mut out = Vec::new();
        for t in tasks {
            if let Role::Load(_) = t.role {
                let n = load_buffers(model, t.stage, true).len();
                for (k, (s, e)) in segments(t.start, t.end, n).into_iter().enumerate() {
                    out.push(Task::new(t.stage, Role::Load(k), t.tile, s, e));
                }
            } else {
                out.push(t.clone());
            }
        }
        TimelineExporter::from_schedule(&out)
    }

    #[test]
    fn test_round_trip_split_label_loads() {
        let model = StageModel::default();
        assert_eq!(load_buffers(&model, StageKind::Qk, true), vec!["q_device", "k_device"]);
        assert_eq!(load_buffers(&model, StageKind::Pv, true), vec!["v_device", "p_tile_fifo"]);
        let opts = SynthOptions {
            split_loads: true,
            ..SynthOptions::default()
        };
        for (tiles, preload) in grid() {
            let tasks = schedule(tiles, preload, CycleCosts::default(), 10, 10);
            let rec = round_trip(&tasks, &opts);
            assert_eq!(rec, split_expected(&tasks, &model), "tiles={} preload={}", tiles, preload);
        }

        let rec = round_trip(&example(), &opts);
        let span = |label: &str, tile: usize| {
            rec.iter()
                .find(|t| t.label == label && t.tile == tile)
                .map(|t| (t.start, t.end))
        };
        assert_eq!(span("qk_load0", 0), Some((0, 5)));
        assert_eq!(span("qk_load1", 0), Some((5, 10)));
        assert_eq!(span("pv_load0", 2), Some((142, 147)));
        assert_eq!(span("pv_load1", 2), Some((147, 152)));
        assert_eq!(span("p_load1", 0), None);
    }

    #[test]
    fn test_round_trip_diff_is_identical() {
        let tasks = example();
        let synth = render_logs(&tasks, &StageModel::default());
        let rec = reconstruct(&synth.logs, &synth.manifest, &TargetProfile::default());
        let d = diff(&TimelineExporter::from_schedule(&tasks), &rec.tasks());
        assert!(d.is_identical(), "{}", d);
        assert_eq!(d.matched, tasks.len());
    }

    #[test]
    fn test_line_shape() {
        let tasks = vec![Task::new(StageKind::Qk, Role::Load(0), 0, 0, 10)];
        let synth = render_logs(&tasks, &StageModel::default());
        assert_eq!(
            synth.logs.cube_start,
            "[0] PC: 0x1000 (0) MTE2 : (1010 0110) MOV_OUT_TO_L1 XN:0x10000000 id=0\n"
        );
        assert_eq!(
            synth.logs.cube_end,
            "[10] PC: 0x1000 (0) MTE2 : (1010 0110) MOV_OUT_TO_L1 XN:0x10000000 id=0\n"
        );
        assert!(synth.logs.vector_start.is_empty());
        assert_eq!(synth.manifest.get("k_device").unwrap().base, BUFFER_BASE);
    }

    #[test]
    fn test_compute_line_carries_stage_buffer() {
        let model = StageModel::default();
        let tasks = vec![Task::new(StageKind::Gu, Role::Compute, 1, 0, 6)];
        let synth = render_logs(&tasks, &model);
        let base = synth.manifest.get("pv_tile").unwrap().base;
        assert_eq!(
            synth.logs.vector_start,
            format!("[0] PC: 0x1000 (0) VEC : (1010 0110) VADD XN:{:#x} id=0\n", base + TILE_STRIDE)
        );
        assert_eq!(model.correlate(Core::Vector, "pv_tile"), Some(StageKind::Gu));

        let bare = render_logs_with(
            &tasks,
            &model,
            &SynthOptions {
                compute_buffers: false,
                ..SynthOptions::default()
            },
        );
        assert!(!bare.logs.vector_start.contains("XN:"));
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments(0, 10, 2), vec![(0, 5), (5, 10)]);
        assert_eq!(segments(3, 3, 2), vec![(3, 3), (3, 3)]);
        assert_eq!(segments(0, 10, 0), vec![(0, 10)]);
    }

    #[test]
    fn test_completion_log_in_end_order() {
        let tasks = vec![
            Task::new(StageKind::P, Role::Compute, 0, 0, 50),
            Task::new(StageKind::P, Role::Store, 0, 10, 20),
        ];
        let synth = render_logs(&tasks, &StageModel::default());
        let ends: Vec<&str> = synth.logs.vector_end.lines().collect();
        assert!(ends[0].starts_with("[20]"));
        assert!(ends[1].starts_with("[50]"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let synth = render_logs(&example(), &StageModel::default());
        synth.write_to(dir.path()).unwrap();
        let manifest = BufferMap::load(dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest, synth.manifest);
        let logs = TraceLogs::read(
            dir.path().join(CUBE_START_LOG),
            dir.path().join(CUBE_END_LOG),
            dir.path().join(VECTOR_START_LOG),
            dir.path().join(VECTOR_END_LOG),
        )
        .unwrap();
        assert_eq!(logs.cube_end, synth.logs.cube_end);
    }
}
