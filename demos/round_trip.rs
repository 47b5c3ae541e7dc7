//! Example: schedule -> synthetic logs -> reconstruction
//!
//! Generates the reference 3-tile schedule, renders it into per-core
//! issue/completion logs and recovers the timeline from those logs.
//!
//! Run with: cargo run --example round_trip

use fa_timeline::{
    diff, reconstruct, simulate, synth, CycleCosts, ScheduleParams, TargetProfile, TimelineExporter,
};

fn main() {
    println!("=== Schedule / Trace Round Trip ===\n");

    let params = ScheduleParams::new(3, 1, CycleCosts::new(10, 16, 10, 6), 10, 10);
    let tasks = simulate(&params);
    println!("Scheduled {} sub-tasks over {} tiles", tasks.len(), params.tiles);

    let profile = TargetProfile::default();
    let logs = synth::render_logs(&tasks, &profile.stages);
    println!(
        "Rendered {} cube and {} vector issue lines\n",
        logs.logs.cube_start.lines().count(),
        logs.logs.vector_start.lines().count()
    );

    let rec = reconstruct(&logs.logs, &logs.manifest, &profile);
    println!(
        "Reconstructed {} instructions ({} staged, {} unknown)",
        rec.instrs.len(),
        rec.summary.staged,
        rec.summary.unknown
    );

    let d = diff(&TimelineExporter::from_schedule(&tasks), &rec.tasks());
    println!("{}", d);
    for task in rec.tasks().iter().take(6) {
        println!("  {}", task);
    }
}
