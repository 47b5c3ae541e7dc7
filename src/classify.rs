//! Op-class assignment for paired instructions
//!
//! The class of an instruction is decided by priority:
//! sync markers, then compute mnemonics, then per-core pipeline rules.
//! Everything else is `other`. The tables are data so that a target
//! profile can extend them.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::stage::Core;

/// Coarse role of a hardware instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpClass {
    Load,
    Compute,
    Store,
    Sync,
    Other,
}

impl OpClass {
    pub fn name(&self) -> &'static str {
        match self {
            OpClass::Load => "load",
            OpClass::Compute => "compute",
            OpClass::Store => "store",
            OpClass::Sync => "sync",
            OpClass::Other => "other",
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, OpClass::Load | OpClass::Store)
    }
}

impl std::fmt::Display for OpClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `(core, pipeline prefix) -> class`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRule {
    pub core: Core,
    pub pipeline_prefix: String,
    pub class: OpClass,
}

impl PipelineRule {
    fn new(core: Core, prefix: &str, class: OpClass) -> Self {
        Self {
            core,
            pipeline_prefix: prefix.to_string(),
            class,
        }
    }
}

/// Hand-tuned classification table of one target ISA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassTable {
    /// Line substrings marking flag set/wait plumbing
    pub sync_markers: Vec<String>,
    /// Opcode prefixes that are always compute
    pub compute_prefixes: Vec<String>,
    /// Checked in order after the compute prefixes
    pub pipelines: Vec<PipelineRule>,
}

impl Default for ClassTable {
    fn default() -> Self {
        let strings = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            sync_markers: strings(&["SET_CROSS_CORE", "SET_FLAG", "WAIT_FLAG", "WAIT_FLAG_DEVI"]),
            compute_prefixes: strings(&[
                "MMAD", "VMAX", "VCMAX", "VCGMAX", "VADD", "VSUB", "VBRCB", "VMULS", "VEXP",
                "VCADD", "VCGADD", "VCONV", "VDIV", "VMUL",
            ]),
            pipelines: vec![
                PipelineRule::new(Core::Cube, "MMAD", OpClass::Compute),
                // Store pipes differ per core: FIXP drains the cube, MTE3 the vector
                PipelineRule::new(Core::Cube, "MTE2", OpClass::Load),
                PipelineRule::new(Core::Cube, "FIXP", OpClass::Store),
                PipelineRule::new(Core::Vector, "MTE2", OpClass::Load),
                PipelineRule::new(Core::Vector, "MTE3", OpClass::Store),
            ],
        }
    }
}

/// Assigns an [`OpClass`] to events
#[derive(Debug, Clone, Default)]
pub struct OpClassifier {
    table: ClassTable,
}

impl OpClassifier {
    pub fn new(table: ClassTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ClassTable {
        &self.table
    }

    pub fn classify(&self, event: &Event) -> OpClass {
        self.classify_parts(&event.opcode, event.core, &event.pipeline, &event.raw_line)
    }

    pub fn classify_parts(&self, opcode: &str, core: Core, pipeline: &str, line: &str) -> OpClass {
        let t = &self.table;
        if t.sync_markers.iter().any(|m| line.contains(m.as_str())) {
            return OpClass::Sync;
        }
        if t.compute_prefixes.iter().any(|p| opcode.starts_with(p.as_str())) {
            return OpClass::Compute;
        }
        t.pipelines
            .iter()
            .find(|r| r.core == core && pipeline.starts_with(r.pipeline_prefix.as_str()))
            .map_or(OpClass::Other, |r| r.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(opcode: &str, core: Core, pipeline: &str, line: &str) -> OpClass {
        OpClassifier::default().classify_parts(opcode, core, pipeline, line)
    }

    #[test]
    fn test_sync_wins() {
        // A flag wait on a memory pipe is still sync
        assert_eq!(
            classify("WAIT_FLAG", Core::Cube, "MTE2", "[1] (0) MTE2 : (01) WAIT_FLAG"),
            OpClass::Sync
        );
        assert_eq!(
            classify("SCALAR", Core::Vector, "SCALAR", "[1] (0) SCALAR WAIT_FLAG_DEVI"),
            OpClass::Sync
        );
    }

    #[test]
    fn test_compute_before_pipeline() {
        // VCONV runs on a store-looking pipe but is compute
        assert_eq!(classify("VCONV_F322F16", Core::Vector, "MTE3", ""), OpClass::Compute);
        assert_eq!(classify("MMAD", Core::Cube, "CUBE", ""), OpClass::Compute);
        assert_eq!(classify("MAD_X", Core::Cube, "MMAD", ""), OpClass::Compute);
        // The MMAD pipeline rule is cube-only
        assert_eq!(classify("MAD_X", Core::Vector, "MMAD", ""), OpClass::Other);
    }

    #[test]
    fn test_memory_per_core() {
        assert_eq!(classify("MOV_OUT_TO_L1", Core::Cube, "MTE2", ""), OpClass::Load);
        assert_eq!(classify("FIX_L0C_TO_OUT", Core::Cube, "FIXP", ""), OpClass::Store);
        assert_eq!(classify("MOV_OUT_TO_UB", Core::Vector, "MTE2", ""), OpClass::Load);
        assert_eq!(classify("MOV_UB_TO_OUT", Core::Vector, "MTE3", ""), OpClass::Store);
        assert_eq!(classify("MOV_UB_TO_OUT", Core::Cube, "MTE3", ""), OpClass::Other);
        assert_eq!(classify("FIX_X", Core::Vector, "FIXP", ""), OpClass::Other);
    }

    #[test]
    fn test_table_from_toml() {
        let table: ClassTable = toml::from_str(
            r#"
            compute_prefixes = ["VFOO"]
            [[pipelines]]
            core = "vector"
            pipeline_prefix = "DMA"
            class = "load"
            "#,
        )
        .unwrap();
        let c = OpClassifier::new(table);
        assert_eq!(c.classify_parts("VFOO", Core::Vector, "VEC", ""), OpClass::Compute);
        assert_eq!(c.classify_parts("X", Core::Vector, "DMA_IN", ""), OpClass::Load);
        // Omitted markers fall back to the defaults
        assert_eq!(c.classify_parts("X", Core::Vector, "DMA", "SET_FLAG"), OpClass::Sync);
    }
}
