//! Example: makespan as a function of preload depth
//!
//! Run with: cargo run --example preload_sweep

use fa_timeline::{simulate, CycleCosts, ScheduleParams};

fn main() {
    println!("=== Preload Sweep (8 tiles) ===\n");
    println!("{:>7} {:>9}", "preload", "makespan");

    for preload in 0..=8 {
        let params = ScheduleParams::new(8, preload, CycleCosts::default(), 10, 10);
        let tasks = simulate(&params);
        let makespan = tasks.iter().map(|t| t.end).max().unwrap_or(0);
        println!("{:>7} {:>9}", preload, makespan);
    }
}
