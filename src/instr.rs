//! Paired, classified instructions

use serde::{Deserialize, Serialize};

use crate::buffers::BufferMap;
use crate::classify::{OpClass, OpClassifier};
use crate::event::Event;
use crate::stage::{Core, StageKind, StageModel};

/// Stage assigned to an instruction; `Unknown` marks an unresolved one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StageTag {
    Stage(StageKind),
    Unknown,
}

impl StageTag {
    pub fn kind(&self) -> Option<StageKind> {
        match self {
            StageTag::Stage(k) => Some(*k),
            StageTag::Unknown => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StageTag::Stage(k) => k.name(),
            StageTag::Unknown => "Unknown",
        }
    }
}

impl From<StageTag> for String {
    fn from(tag: StageTag) -> Self {
        tag.name().to_string()
    }
}

impl TryFrom<String> for StageTag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Unknown" {
            return Ok(StageTag::Unknown);
        }
        StageKind::parse(&s)
            .map(StageTag::Stage)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

impl std::fmt::Display for StageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One issue/completion pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub core: Core,
    pub ts_start: u64,
    /// May precede `ts_start` in bad logs
    pub ts_end: u64,
    pub pc: Option<u64>,
    pub pipeline: String,
    pub opcode: String,
    pub op_class: OpClass,
    pub buffer: Option<String>,
    pub buffer_addr: Option<u64>,
    pub stage: Option<StageTag>,
    /// Stage abbreviation plus loop index, e.g. `pv3`
    pub stage_name: Option<String>,
    pub addresses: Vec<u64>,
    pub line_start: usize,
    pub line_end: usize,
    pub instr_id: Option<u64>,
}

impl Instr {
    /// `ts_end`, clamped so the interval is never inverted
    pub fn end(&self) -> u64 {
        self.ts_end.max(self.ts_start)
    }

    pub fn stage_kind(&self) -> Option<StageKind> {
        self.stage.and_then(|s| s.kind())
    }

    /// Loop index parsed from `stage_name`
    pub fn loop_index(&self) -> Option<usize> {
        let name = self.stage_name.as_deref()?;
        let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
        digits.parse().ok()
    }
}

/// Builds [`Instr`]s and performs buffer correlation
pub struct InstrBuilder<'a> {
    classifier: &'a OpClassifier,
    buffers: &'a BufferMap,
    model: &'a StageModel,
}

impl<'a> InstrBuilder<'a> {
    pub fn new(classifier: &'a OpClassifier, buffers: &'a BufferMap, model: &'a StageModel) -> Self {
        Self {
            classifier,
            buffers,
            model,
        }
    }

    pub fn build(&self, start: &Event, end: &Event) -> Instr {
        let op_class = self.classifier.classify(start);
        let resolved = self.buffers.resolve(&start.opcode, &start.operands);
        let kind = resolved
            .as_ref()
            .and_then(|(name, _)| self.model.correlate(start.core, name));
        // Computes without a stage buffer are left to inference
        let stage = match op_class {
            OpClass::Load | OpClass::Store => Some(kind.map_or(StageTag::Unknown, StageTag::Stage)),
            OpClass::Compute => kind.map(StageTag::Stage),
            OpClass::Sync | OpClass::Other => None,
        };
        let (buffer, buffer_addr) = match resolved {
            Some((name, addr)) => (Some(name), Some(addr)),
            None => (None, None),
        };
        Instr {
            core: start.core,
            ts_start: start.timestamp,
            ts_end: end.timestamp,
            pc: start.pc,
            pipeline: start.pipeline.clone(),
            opcode: start.opcode.clone(),
            op_class,
            buffer,
            buffer_addr,
            stage,
            stage_name: None,
            addresses: start.addresses(),
            line_start: start.line_number,
            line_end: end.line_number,
            instr_id: start.id,
        }
    }

    /// Build all pairs, ordered by `(ts_start, core)`; ties keep pair order
    pub fn build_all(&self, pairs: &[(Event, Event)]) -> Vec<Instr> {
        let mut instrs: Vec<Instr> = pairs.iter().map(|(s, e)| self.build(s, e)).collect();
        instrs.sort_by_key(|i| (i.ts_start, i.core));
        instrs
    }
}
