//! Flash-attention pipeline timelines
//!
//! This library models the timing of a tiled `qk -> p -> pv -> gu` pipeline
//! running on two hardware cores (cube and vector) in two directions:
//!
//! - [`simulate`] schedules a realizable timeline from stage costs and a
//!   preload policy.
//! - [`reconstruct`] recovers the same stage-tagged timeline from raw
//!   per-core issue/completion instruction logs.
//!
//! Both reduce to the canonical [`Task`] list of [`TimelineExporter`], so a
//! simulated and an observed timeline can be diffed directly.
//!
//! # Example
//!
//! ```rust
//! use fa_timeline::{
//!     reconstruct, simulate, synth, CycleCosts, ScheduleParams, StageModel, TargetProfile,
//!     TimelineExporter,
//! };
//!
//! let params = ScheduleParams::new(3, 1, CycleCosts::new(10, 16, 10, 6), 10, 10);
//! let tasks = simulate(&params);
//! let logs = synth::render_logs(&tasks, &StageModel::default());
//! let rec = reconstruct(&logs.logs, &logs.manifest, &TargetProfile::default());
//! assert_eq!(rec.tasks(), TimelineExporter::from_schedule(&tasks));
//! ```

pub mod stage;
pub mod task;
pub mod resource;
pub mod scheduler;
pub mod lexer;
pub mod event;
pub mod pairing;
pub mod classify;
pub mod buffers;
pub mod instr;
pub mod inference;
pub mod export;
pub mod svg;
pub mod synth;
pub mod config;
pub mod error;

use std::path::Path;

pub use buffers::BufferMap;
pub use classify::{ClassTable, OpClass, OpClassifier};
pub use config::TargetProfile;
pub use error::{TimelineError, TimelineResult};
pub use event::{Event, LogEventParser, NoiseTable};
pub use export::{diff, TimelineDiff, TimelineExporter};
pub use inference::{InferenceSummary, StageInferencer};
pub use instr::{Instr, InstrBuilder, StageTag};
pub use pairing::{EventPairer, PairingDiagnostic};
pub use resource::ResourceTimeline;
pub use scheduler::{schedule, CycleCosts, ForwardScheduler, ScheduleParams};
pub use stage::{Core, StageKind, StageModel};
pub use task::{Role, Task};

/// The four raw logs of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceLogs {
    pub cube_start: String,
    pub cube_end: String,
    pub vector_start: String,
    pub vector_end: String,
}

impl TraceLogs {
    pub fn read(
        cube_start: impl AsRef<Path>,
        cube_end: impl AsRef<Path>,
        vector_start: impl AsRef<Path>,
        vector_end: impl AsRef<Path>,
    ) -> TimelineResult<Self> {
        Ok(Self {
            cube_start: event::read_log(cube_start)?,
            cube_end: event::read_log(cube_end)?,
            vector_start: event::read_log(vector_start)?,
            vector_end: event::read_log(vector_end)?,
        })
    }
}

/// Output of [`reconstruct`]
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Sorted by `(ts_start, core)`
    pub instrs: Vec<Instr>,
    pub diagnostics: Vec<PairingDiagnostic>,
    pub summary: InferenceSummary,
}

impl Reconstruction {
    /// Canonical timeline of the reconstructed instructions
    pub fn tasks(&self) -> Vec<Task> {
        TimelineExporter::from_instrs(&self.instrs)
    }
}

/// Run the forward scheduler on a fresh resource timeline
pub fn simulate(params: &ScheduleParams) -> Vec<Task> {
    ForwardScheduler::new(*params).run(&mut ResourceTimeline::new())
}

/// Parse, pair, classify and stage-tag the logs of one run
pub fn reconstruct(logs: &TraceLogs, buffers: &BufferMap, profile: &TargetProfile) -> Reconstruction {
    let parser = profile.parser();
    let mut starts = parser.parse_log(&logs.cube_start, Core::Cube);
    starts.extend(parser.parse_log(&logs.vector_start, Core::Vector));
    let mut ends = parser.parse_log(&logs.cube_end, Core::Cube);
    ends.extend(parser.parse_log(&logs.vector_end, Core::Vector));

    let pairing = EventPairer::pair(starts, ends);

    let classifier = profile.classifier();
    let builder = InstrBuilder::new(&classifier, buffers, &profile.stages);
    let mut instrs = builder.build_all(&pairing.pairs);
    let summary = StageInferencer::new(&profile.stages).infer(&mut instrs);

    Reconstruction {
        instrs,
        diagnostics: pairing.diagnostics,
        summary,
    }
}
