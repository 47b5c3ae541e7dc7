//! Device address manifest
//!
//! ```toml
//! k_device = { addr = "0x12c0080000", size_bytes = 65536 }
//! ```
//!
//! Malformed entries are skipped. Overlapping ranges are accepted with a
//! warning; lookups then resolve to the range with the lowest base.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TimelineError, TimelineResult};
use crate::lexer::Operand;

/// Opcode whose XN operand names the transferred buffer
const ALIGNED_MOVE: &str = "MOV_SRC_TO_DST_ALIGN";

/// A named `[base, base + size)` device range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRange {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

#[derive(Serialize)]
struct ManifestEntry {
    addr: String,
    size_bytes: u64,
}

/// Buffer name lookup by address; immutable once loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferMap {
    ranges: Vec<BufferRange>,
}

impl BufferMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> TimelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TimelineError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> TimelineResult<Self> {
        let table: toml::Table = text.parse()?;
        let mut map = Self::new();
        for (name, value) in &table {
            match parse_entry(value) {
                Some((base, size)) => map.insert(name, base, size),
                None => log::debug!("manifest: skipping malformed entry '{}'", name),
            }
        }
        if map.is_empty() && !table.is_empty() {
            return Err(TimelineError::manifest(format!(
                "none of {} entries has a hex addr and numeric size_bytes",
                table.len()
            )));
        }
        map.check_overlaps();
        log::debug!("manifest: {} buffers", map.len());
        Ok(map)
    }

    /// Add a range, keeping ranges ordered by base
    pub fn insert(&mut self, name: impl Into<String>, base: u64, size: u64) {
        let pos = self.ranges.partition_point(|r| r.base <= base);
        self.ranges.insert(
            pos,
            BufferRange {
                name: name.into(),
                base,
                size,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[BufferRange] {
        &self.ranges
    }

    pub fn get(&self, name: &str) -> Option<&BufferRange> {
        self.ranges.iter().find(|r| r.name == name)
    }

    pub fn lookup(&self, addr: u64) -> Option<&BufferRange> {
        self.ranges.iter().find(|r| r.contains(addr))
    }

    /// Buffer touched by an instruction, with the address that hit it
    pub fn resolve(&self, opcode: &str, operands: &[Operand]) -> Option<(String, u64)> {
        if opcode.starts_with(ALIGNED_MOVE) {
            let hit = operands
                .iter()
                .filter(|op| op.label == "XN")
                .find_map(|op| self.lookup(op.addr).map(|r| (r.name.clone(), op.addr)));
            if hit.is_some() {
                return hit;
            }
        }
        operands
            .iter()
            .find_map(|op| self.lookup(op.addr).map(|r| (r.name.clone(), op.addr)))
    }

    /// Render in manifest form, loadable by [`BufferMap::from_toml_str`]
    pub fn to_toml_string(&self) -> TimelineResult<String> {
        let entries: BTreeMap<&str, ManifestEntry> = self
            .ranges
            .iter()
            .map(|r| {
                (
                    r.name.as_str(),
                    ManifestEntry {
                        addr: format!("{:#x}", r.base),
                        size_bytes: r.size,
                    },
                )
            })
            .collect();
        Ok(toml::to_string(&entries)?)
    }

    fn check_overlaps(&self) {
        for (i, a) in self.ranges.iter().enumerate() {
            for b in &self.ranges[i + 1..] {
                if b.base >= a.end() {
                    break;
                }
                log::warn!(
                    "manifest: buffers '{}' and '{}' overlap at {:#x}",
                    a.name,
                    b.name,
                    b.base
                );
            }
        }
    }
}

fn parse_entry(value: &toml::Value) -> Option<(u64, u64)> {
    let entry = value.as_table()?;
    let addr = entry.get("addr")?.as_str()?;
    let hex = addr.strip_prefix("0x").or_else(|| addr.strip_prefix("0X"))?;
    let base = u64::from_str_radix(hex, 16).ok()?;
    let size = match entry.get("size_bytes")? {
        toml::Value::Integer(n) => u64::try_from(*n).ok()?,
        toml::Value::Float(f) if *f >= 0.0 => *f as u64,
        _ => return None,
    };
    Some((base, size))
}
