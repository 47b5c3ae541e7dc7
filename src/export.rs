//! Canonical timeline export and report writers
//!
//! Simulated and reconstructed timelines both reduce to one [`Task`] per
//! `(stage, loop index, role)`. Every additional load of a loop gets its
//! own `load<k>` role; compute and store entries of the same loop merge to
//! `min(start)..max(end)`. The result is sorted by `(start, tile, label)`.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::OpClass;
use crate::error::{TimelineError, TimelineResult};
use crate::instr::Instr;
use crate::stage::{Core, StageKind};
use crate::task::{Role, Task};

pub struct TimelineExporter;

impl TimelineExporter {
    /// Reduce stage-named instructions; unnamed ones are left out
    pub fn from_instrs(instrs: &[Instr]) -> Vec<Task> {
        let mut merger = Merger::default();
        let mut load_seq: HashMap<(StageKind, usize), usize> = HashMap::new();
        for ins in instrs {
            let (Some(kind), Some(tile)) = (ins.stage_kind(), ins.loop_index()) else {
                continue;
            };
            let role = match ins.op_class {
                OpClass::Load => {
                    let seq = load_seq.entry((kind, tile)).or_insert(0);
                    *seq += 1;
                    Role::Load(*seq - 1)
                }
                OpClass::Compute => Role::Compute,
                OpClass::Store => Role::Store,
                OpClass::Sync | OpClass::Other => continue,
            };
            merger.add(Task::new(kind, role, tile, ins.ts_start, ins.end()));
        }
        merger.finish()
    }

    pub fn from_schedule(tasks: &[Task]) -> Vec<Task> {
        let mut merger = Merger::default();
        for t in tasks {
            merger.add(Task::new(t.stage, t.role, t.tile, t.start, t.end.max(t.start)));
        }
        merger.finish()
    }
}

#[derive(Default)]
struct Merger {
    tasks: Vec<Task>,
    index: HashMap<(StageKind, usize, Role), usize>,
}

impl Merger {
    fn add(&mut self, task: Task) {
        let key = (task.stage, task.tile, task.role);
        match self.index.get(&key) {
            Some(&i) => {
                let t = &mut self.tasks[i];
                t.start = t.start.min(task.start);
                t.end = t.end.max(task.end);
            }
            None => {
                self.index.insert(key, self.tasks.len());
                self.tasks.push(task);
            }
        }
    }

    fn finish(mut self) -> Vec<Task> {
        sort_tasks(&mut self.tasks);
        self.tasks
    }
}

pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Timing difference of a task present in both timelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDelta {
    pub label: String,
    pub tile: usize,
    /// observed minus simulated
    pub start_delta: i64,
    pub end_delta: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineDiff {
    pub only_simulated: Vec<Task>,
    pub only_observed: Vec<Task>,
    pub shifted: Vec<TaskDelta>,
    pub matched: usize,
}

impl TimelineDiff {
    pub fn is_identical(&self) -> bool {
        self.only_simulated.is_empty() && self.only_observed.is_empty() && self.shifted.is_empty()
    }
}

impl std::fmt::Display for TimelineDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} matched, {} shifted, {} only simulated, {} only observed",
            self.matched,
            self.shifted.len(),
            self.only_simulated.len(),
            self.only_observed.len()
        )
    }
}

/// Compare two canonical timelines task by task, keyed by `(label, tile)`
pub fn diff(simulated: &[Task], observed: &[Task]) -> TimelineDiff {
    let mut remaining: HashMap<(&str, usize), &Task> =
        observed.iter().map(|t| ((t.label.as_str(), t.tile), t)).collect();
    let mut out = TimelineDiff::default();
    for sim in simulated {
        match remaining.remove(&(sim.label.as_str(), sim.tile)) {
            Some(obs) => {
                out.matched += 1;
                if obs.start != sim.start || obs.end != sim.end {
                    out.shifted.push(TaskDelta {
                        label: sim.label.clone(),
                        tile: sim.tile,
                        start_delta: obs.start as i64 - sim.start as i64,
                        end_delta: obs.end as i64 - sim.end as i64,
                    });
                }
            }
            None => out.only_simulated.push(sim.clone()),
        }
    }
    out.only_observed = observed
        .iter()
        .filter(|t| remaining.contains_key(&(t.label.as_str(), t.tile)))
        .cloned()
        .collect();
    out
}

/// Interval summary of one `(core, buffer, op_class)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub core: Core,
    pub buffer: String,
    pub op_class: OpClass,
    pub start: u64,
    pub end: u64,
    pub duration: u64,
}

pub fn aggregate(instrs: &[Instr]) -> Vec<AggregateRow> {
    let mut buckets: BTreeMap<(Core, String, OpClass), (u64, u64)> = BTreeMap::new();
    for ins in instrs {
        let buffer = ins.buffer.clone().unwrap_or_else(|| "unknown".to_string());
        let span = buckets
            .entry((ins.core, buffer, ins.op_class))
            .or_insert((ins.ts_start, ins.end()));
        span.0 = span.0.min(ins.ts_start);
        span.1 = span.1.max(ins.end());
    }
    let mut rows: Vec<AggregateRow> = buckets
        .into_iter()
        .map(|((core, buffer, op_class), (start, end))| AggregateRow {
            core,
            buffer,
            op_class,
            start,
            end,
            duration: end - start,
        })
        .collect();
    rows.sort_by(|a, b| (a.core, &a.buffer, a.start).cmp(&(b.core, &b.buffer, b.start)));
    rows
}

const INSTR_COLUMNS: [&str; 15] = [
    "core",
    "ts_start",
    "ts_end",
    "pipeline",
    "opcode",
    "op_class",
    "stage",
    "stage_name",
    "buffer",
    "buffer_addr",
    "addresses",
    "pc",
    "line_start",
    "line_end",
    "instr_id",
];

fn csv_field(s: &str) -> Cow<'_, str> {
    if s.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(s)
    }
}

fn csv_row(fields: &[String]) -> String {
    let cells: Vec<Cow<'_, str>> = fields.iter().map(|f| csv_field(f)).collect();
    cells.join(",")
}

fn hex(v: Option<u64>) -> String {
    v.map(|a| format!("{:#x}", a)).unwrap_or_default()
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Per-instruction CSV
pub fn instr_csv(instrs: &[Instr]) -> String {
    let mut out = INSTR_COLUMNS.join(",");
    out.push('\n');
    for ins in instrs {
        let addresses: Vec<String> = ins.addresses.iter().map(|a| format!("{:#x}", a)).collect();
        let row = [
            ins.core.to_string(),
            ins.ts_start.to_string(),
            ins.ts_end.to_string(),
            ins.pipeline.clone(),
            ins.opcode.clone(),
            ins.op_class.to_string(),
            opt(&ins.stage),
            opt(&ins.stage_name),
            opt(&ins.buffer),
            hex(ins.buffer_addr),
            addresses.join(","),
            hex(ins.pc),
            ins.line_start.to_string(),
            ins.line_end.to_string(),
            opt(&ins.instr_id),
        ];
        out.push_str(&csv_row(&row));
        out.push('\n');
    }
    out
}

pub fn aggregate_csv(rows: &[AggregateRow]) -> String {
    let mut out = String::from("core,buffer,op_class,start,end,duration\n");
    for r in rows {
        let row = [
            r.core.to_string(),
            r.buffer.clone(),
            r.op_class.to_string(),
            r.start.to_string(),
            r.end.to_string(),
            r.duration.to_string(),
        ];
        out.push_str(&csv_row(&row));
        out.push('\n');
    }
    out
}

pub fn write_text(path: impl AsRef<Path>, text: &str) -> TimelineResult<()> {
    let path = path.as_ref();
    fs::write(path, text).map_err(|e| TimelineError::io(path, e))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn write_instr_csv(instrs: &[Instr], path: impl AsRef<Path>) -> TimelineResult<()> {
    write_text(path, &instr_csv(instrs))
}

pub fn write_instr_json(instrs: &[Instr], path: impl AsRef<Path>) -> TimelineResult<()> {
    write_text(path, &serde_json::to_string_pretty(instrs)?)
}

pub fn write_aggregate_csv(rows: &[AggregateRow], path: impl AsRef<Path>) -> TimelineResult<()> {
    write_text(path, &aggregate_csv(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::StageTag;
    use pretty_assertions::assert_eq;

    fn named(kind: StageKind, class: OpClass, name: &str, start: u64, end: u64) -> Instr {
        Instr {
            core: kind.core(),
            ts_start: start,
            ts_end: end,
            pc: Some(0x40),
            pipeline: "MTE2".to_string(),
            opcode: "MOV".to_string(),
            op_class: class,
            buffer: Some("k_device".to_string()),
            buffer_addr: Some(0x1000),
            stage: Some(StageTag::Stage(kind)),
            stage_name: Some(name.to_string()),
            addresses: vec![0x1000, 0x2000],
            line_start: 3,
            line_end: 7,
            instr_id: None,
        }
    }

    #[test]
    fn test_loads_stay_distinct_compute_merges() {
        let instrs = vec![
            named(StageKind::Pv, OpClass::Load, "pv0", 0, 10),
            named(StageKind::Pv, OpClass::Load, "pv0", 10, 20),
            named(StageKind::Pv, OpClass::Compute, "pv0", 20, 25),
            named(StageKind::Pv, OpClass::Compute, "pv0", 24, 30),
            named(StageKind::Pv, OpClass::Store, "pv0", 30, 40),
        ];
        let tasks = TimelineExporter::from_instrs(&instrs);
        let got: Vec<(&str, u64, u64)> = tasks.iter().map(|t| (t.label.as_str(), t.start, t.end)).collect();
        assert_eq!(
            got,
            vec![
                ("pv_load0", 0, 10),
                ("pv_load1", 10, 20),
                ("pv_comp", 20, 30),
                ("pv_store", 30, 40),
            ]
        );
        assert!(tasks.iter().all(|t| t.core == Core::Cube && t.tile == 0));
    }

    #[test]
    fn test_unnamed_and_sync_skipped() {
        let mut unnamed = named(StageKind::Qk, OpClass::Compute, "qk0", 0, 1);
        unnamed.stage_name = None;
        let mut unknown = named(StageKind::Qk, OpClass::Load, "qk0", 0, 1);
        unknown.stage = Some(StageTag::Unknown);
        let sync = named(StageKind::Qk, OpClass::Sync, "qk0", 0, 1);
        assert!(TimelineExporter::from_instrs(&[unnamed, unknown, sync]).is_empty());
    }

    #[test]
    fn test_inverted_interval_clamped() {
        let tasks = TimelineExporter::from_instrs(&[named(StageKind::P, OpClass::Compute, "p1", 50, 40)]);
        assert_eq!((tasks[0].start, tasks[0].end, tasks[0].tile), (50, 50, 1));
        assert_eq!(tasks[0].core, Core::Vector);
    }

    #[test]
    fn test_sorted_by_start_tile_label() {
        let tasks = TimelineExporter::from_schedule(&[
            Task::new(StageKind::Qk, Role::Store, 1, 10, 20),
            Task::new(StageKind::Qk, Role::Compute, 0, 10, 20),
            Task::new(StageKind::P, Role::Load(0), 0, 10, 20),
            Task::new(StageKind::Qk, Role::Load(0), 0, 0, 10),
        ]);
        let got: Vec<(&str, usize)> = tasks.iter().map(|t| (t.label.as_str(), t.tile)).collect();
        assert_eq!(
            got,
            vec![("qk_load0", 0), ("p_load0", 0), ("qk_comp", 0), ("qk_store", 1)]
        );
    }

    #[test]
    fn test_diff() {
        let sim = vec![
            Task::new(StageKind::Qk, Role::Load(0), 0, 0, 10),
            Task::new(StageKind::Qk, Role::Compute, 0, 10, 20),
            Task::new(StageKind::Qk, Role::Store, 0, 20, 30),
        ];
        let obs = vec![
            Task::new(StageKind::Qk, Role::Load(0), 0, 0, 10),
            Task::new(StageKind::Qk, Role::Compute, 0, 12, 25),
            Task::new(StageKind::P, Role::Load(0), 0, 30, 40),
        ];
        let d = diff(&sim, &obs);
        assert_eq!(d.matched, 2);
        assert_eq!(
            d.shifted,
            vec![TaskDelta {
                label: "qk_comp".to_string(),
                tile: 0,
                start_delta: 2,
                end_delta: 5
            }]
        );
        assert_eq!(d.only_simulated[0].label, "qk_store");
        assert_eq!(d.only_observed[0].label, "p_load0");
        assert!(!d.is_identical());
        assert!(diff(&sim, &sim).is_identical());
    }

    #[test]
    fn test_aggregate() {
        let mut a = named(StageKind::Qk, OpClass::Load, "qk0", 5, 10);
        a.buffer = None;
        let rows = aggregate(&[
            named(StageKind::Qk, OpClass::Load, "qk0", 20, 30),
            named(StageKind::Qk, OpClass::Load, "qk1", 0, 10),
            a,
        ]);
        assert_eq!(
            rows,
            vec![
                AggregateRow {
                    core: Core::Cube,
                    buffer: "k_device".to_string(),
                    op_class: OpClass::Load,
                    start: 0,
                    end: 30,
                    duration: 30
                },
                AggregateRow {
                    core: Core::Cube,
                    buffer: "unknown".to_string(),
                    op_class: OpClass::Load,
                    start: 5,
                    end: 10,
                    duration: 5
                },
            ]
        );
        assert_eq!(
            aggregate_csv(&rows),
            "core,buffer,op_class,start,end,duration\ncube,k_device,load,0,30,30\ncube,unknown,load,5,10,5\n"
        );
    }

    #[test]
    fn test_instr_csv_quotes_address_list() {
        let csv = instr_csv(&[named(StageKind::Qk, OpClass::Load, "qk0", 0, 10)]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), INSTR_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "cube,0,10,MTE2,MOV,load,compute_qk,qk0,k_device,0x1000,\"0x1000,0x2000\",0x40,3,7,"
        );
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.json");
        let instrs = vec![named(StageKind::Gu, OpClass::Store, "gu2", 1, 2)];
        write_instr_json(&instrs, &path).unwrap();
        let back: Vec<Instr> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, instrs);
    }
}
