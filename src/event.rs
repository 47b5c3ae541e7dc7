//! Raw log lines to structured events
//!
//! Lines without a timestamp or a pipeline tag are not instructions and are
//! dropped silently. Lines that are instructions but carry no pipeline
//! footprint worth modeling are dropped by the [`NoiseTable`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TimelineError, TimelineResult};
use crate::lexer::{LineLexer, Operand};
use crate::stage::Core;

/// One parsed log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: u64,
    pub pc: Option<u64>,
    /// Token directly after the first `)`
    pub pipeline: String,
    /// Mnemonic after the binary encoding when present, else the pipeline tag
    pub opcode: String,
    pub operands: Vec<Operand>,
    pub core: Core,
    pub raw_line: String,
    /// 1-based; 0 for a line parsed on its own with `parse_line`
    pub line_number: usize,
    pub id: Option<u64>,
}

impl Event {
    pub fn addresses(&self) -> Vec<u64> {
        self.operands.iter().map(|op| op.addr).collect()
    }
}

/// A drop rule; every condition that is set must hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseRule {
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub opcode_prefix: Option<String>,
    #[serde(default)]
    pub line_contains: Option<String>,
    /// Keep the line anyway when it contains this marker
    #[serde(default)]
    pub unless_line_contains: Option<String>,
    pub reason: String,
}

impl NoiseRule {
    fn pipeline(tag: &str, reason: &str) -> Self {
        Self {
            pipeline: Some(tag.to_string()),
            opcode_prefix: None,
            line_contains: None,
            unless_line_contains: None,
            reason: reason.to_string(),
        }
    }

    fn line(marker: &str, reason: &str) -> Self {
        Self {
            pipeline: None,
            opcode_prefix: None,
            line_contains: Some(marker.to_string()),
            unless_line_contains: None,
            reason: reason.to_string(),
        }
    }

    fn unless(mut self, marker: &str) -> Self {
        self.unless_line_contains = Some(marker.to_string());
        self
    }

    fn containing(mut self, marker: &str) -> Self {
        self.line_contains = Some(marker.to_string());
        self
    }

    pub fn matches(&self, pipeline: &str, opcode: &str, line: &str) -> bool {
        if self.pipeline.is_none() && self.opcode_prefix.is_none() && self.line_contains.is_none() {
            return false;
        }
        let pipe_ok = self.pipeline.as_deref().map_or(true, |p| p == pipeline);
        let op_ok = self
            .opcode_prefix
            .as_deref()
            .map_or(true, |p| opcode.starts_with(p));
        let line_ok = self.line_contains.as_deref().map_or(true, |m| line.contains(m));
        let exempt = self
            .unless_line_contains
            .as_deref()
            .map_or(false, |m| line.contains(m));
        pipe_ok && op_ok && line_ok && !exempt
    }
}

/// Target-specific table of known log noise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseTable {
    pub rules: Vec<NoiseRule>,
}

impl NoiseTable {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn push(&mut self, rule: NoiseRule) {
        self.rules.push(rule);
    }

    /// First rule dropping this line, if any
    pub fn dropped_by(&self, pipeline: &str, opcode: &str, line: &str) -> Option<&NoiseRule> {
        self.rules.iter().find(|r| r.matches(pipeline, opcode, line))
    }
}

impl Default for NoiseTable {
    /// Noise of the reference target's cube/vector instruction dumps
    fn default() -> Self {
        Self {
            rules: vec![
                NoiseRule::pipeline("SCALAR", "scalar plumbing").unless("WAIT_FLAG_DEVI"),
                NoiseRule::pipeline("FC", "flow control").unless("WAIT_FLAG_DEVI"),
                NoiseRule::pipeline("FIXP", "special-register move").containing("MOV_SPR_XN"),
                NoiseRule::line("MOVEMASK", "mask move"),
                NoiseRule::pipeline("MTE1", "internal buffer movement"),
                NoiseRule {
                    pipeline: None,
                    opcode_prefix: Some("MTE1".to_string()),
                    line_contains: None,
                    unless_line_contains: None,
                    reason: "internal buffer movement".to_string(),
                },
                NoiseRule::line("BAR", "barrier marker"),
            ],
        }
    }
}

/// Log line parser for one target
#[derive(Debug, Clone, Default)]
pub struct LogEventParser {
    noise: NoiseTable,
}

impl LogEventParser {
    pub fn new(noise: NoiseTable) -> Self {
        Self { noise }
    }

    pub fn noise(&self) -> &NoiseTable {
        &self.noise
    }

    /// Parse a line outside any file; the event's `line_number` is 0
    pub fn parse_line(&self, line: &str, core: Core) -> Option<Event> {
        self.parse_numbered(line, 0, core)
    }

    /// Parse one line, or `None` if it is not a modeled instruction
    pub fn parse_numbered(&self, line: &str, line_number: usize, core: Core) -> Option<Event> {
        let lx = LineLexer::new(line);
        let timestamp = lx.timestamp()?;
        let pipeline = lx.pipeline_tag()?;
        let opcode = lx.mnemonic_after_blob().unwrap_or(pipeline);

        if let Some(rule) = self.noise.dropped_by(pipeline, opcode, line) {
            log::trace!("line {}: dropped {} ({})", line_number, opcode, rule.reason);
            return None;
        }

        Some(Event {
            timestamp,
            pc: lx.pc(),
            pipeline: pipeline.to_string(),
            opcode: opcode.to_string(),
            operands: lx.operands(),
            core,
            raw_line: line.to_string(),
            line_number,
            id: lx.id(),
        })
    }

    /// Parse a whole log in file order
    pub fn parse_log(&self, text: &str, core: Core) -> Vec<Event> {
        let events: Vec<Event> = text
            .lines()
            .enumerate()
            .filter_map(|(i, line)| self.parse_numbered(line, i + 1, core))
            .collect();
        log::debug!(
            "{} log: kept {} of {} lines",
            core,
            events.len(),
            text.lines().count()
        );
        events
    }

    pub fn parse_file(&self, path: impl AsRef<Path>, core: Core) -> TimelineResult<Vec<Event>> {
        Ok(self.parse_log(&read_log(path)?, core))
    }
}

/// Read a log file; invalid UTF-8 is replaced rather than rejected
pub fn read_log(path: impl AsRef<Path>) -> TimelineResult<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| TimelineError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
