//! Flash-attention pipeline timeline CLI
//!
//! Usage:
//!   fa-timeline schedule --tiles 10 --preload 1 --output fa_pipeline_generated.svg
//!   fa-timeline schedule --tiles 3 --json --emit-logs logs/
//!   fa-timeline trace --device-addrs device_addrs.toml \
//!       --cube-start cube_start.log --cube-end cube_end.log \
//!       --vec-start vec_start.log --vec-end vec_end.log --out-svg timeline.svg

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use fa_timeline::export::{self, aggregate};
use fa_timeline::svg::{self, SvgOptions};
use fa_timeline::{
    reconstruct, simulate, synth, BufferMap, CycleCosts, ScheduleParams, TargetProfile, Task,
    TimelineError, TimelineResult, TraceLogs,
};

#[derive(Parser, Debug)]
#[command(name = "fa-timeline")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Simulates and reconstructs flash-attention pipeline timelines")]
struct Cli {
    /// Target profile (TOML) overriding the built-in stage, noise and class tables
    #[arg(long = "profile", global = true)]
    profile: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a schedule and render it as SVG
    Schedule(ScheduleArgs),
    /// Reconstruct a timeline from per-core instruction logs
    Trace(TraceArgs),
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    #[arg(long, default_value = "10")]
    tiles: usize,

    /// Tiles of qk/p issued ahead of pv/gu
    #[arg(long, default_value = "0")]
    preload: usize,

    #[arg(long = "cycle-qk", default_value = "10")]
    cycle_qk: u64,

    #[arg(long = "cycle-p", default_value = "16")]
    cycle_p: u64,

    #[arg(long = "cycle-pv", default_value = "10")]
    cycle_pv: u64,

    #[arg(long = "cycle-gu", default_value = "6")]
    cycle_gu: u64,

    #[arg(long = "io-load-overhead", default_value = "10")]
    io_load: u64,

    #[arg(long = "io-store-overhead", default_value = "10")]
    io_store: u64,

    /// Pixels per time unit
    #[arg(long = "slot-width", default_value = "8")]
    slot_width: u64,

    #[arg(short = 'o', long, default_value = "fa_pipeline_generated.svg")]
    output: PathBuf,

    /// Dump the tasks as JSON instead of the tile listing
    #[arg(short = 'j', long = "json")]
    json: bool,

    /// Also write synthetic instruction logs and a device manifest here
    #[arg(long = "emit-logs", value_name = "DIR")]
    emit_logs: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TraceArgs {
    #[arg(long = "device-addrs")]
    device_addrs: PathBuf,

    #[arg(long = "cube-start")]
    cube_start: PathBuf,

    #[arg(long = "cube-end")]
    cube_end: PathBuf,

    #[arg(long = "vec-start")]
    vec_start: PathBuf,

    #[arg(long = "vec-end")]
    vec_end: PathBuf,

    #[arg(long = "out-csv", default_value = "timeline.csv")]
    out_csv: PathBuf,

    #[arg(long = "out-json", default_value = "timeline.json")]
    out_json: PathBuf,

    #[arg(long = "out-agg", default_value = "timeline_agg.csv")]
    out_agg: PathBuf,

    #[arg(long = "out-svg")]
    out_svg: Option<PathBuf>,

    /// Timestamp units per rendered slot
    #[arg(long = "svg-divisor", default_value = "100")]
    svg_divisor: u64,

    #[arg(long = "slot-width", default_value = "8")]
    slot_width: u64,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> TimelineResult<()> {
    let profile = match &cli.profile {
        Some(path) => TargetProfile::load(path)?,
        None => TargetProfile::default(),
    };
    match cli.command {
        Command::Schedule(args) => run_schedule(args, &profile),
        Command::Trace(args) => run_trace(args, &profile),
    }
}

fn check_positive(name: &str, value: u64) -> TimelineResult<()> {
    if value == 0 {
        return Err(TimelineError::invalid_option(format!("--{} must be at least 1", name)));
    }
    Ok(())
}

fn run_schedule(args: ScheduleArgs, profile: &TargetProfile) -> TimelineResult<()> {
    check_positive("slot-width", args.slot_width)?;

    let cycles = CycleCosts::new(args.cycle_qk, args.cycle_p, args.cycle_pv, args.cycle_gu);
    let params = ScheduleParams::new(args.tiles, args.preload, cycles, args.io_load, args.io_store);
    let tasks = simulate(&params);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        print_schedule(&tasks);
    }

    let opts = SvgOptions {
        slot_width: args.slot_width,
        ..SvgOptions::default()
    };
    if svg::write_svg(&tasks, &opts, &args.output)? && !args.json {
        println!("{} {}", "Wrote".green(), args.output.display());
    }

    if let Some(dir) = &args.emit_logs {
        synth::render_logs(&tasks, &profile.stages).write_to(dir)?;
        if !args.json {
            println!("{} synthetic logs to {}", "Wrote".green(), dir.display());
        }
    }
    Ok(())
}

fn print_schedule(tasks: &[Task]) {
    let mut by_tile: BTreeMap<usize, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        by_tile.entry(task.tile).or_default().push(task);
    }
    for (tile, mut group) in by_tile {
        group.sort_by_key(|t| t.start);
        println!("{}", format!("Tile {}:", tile).bold().cyan());
        for task in group {
            println!("  {}", task);
        }
    }
}

fn run_trace(args: TraceArgs, profile: &TargetProfile) -> TimelineResult<()> {
    check_positive("svg-divisor", args.svg_divisor)?;
    check_positive("slot-width", args.slot_width)?;

    let buffers = BufferMap::load(&args.device_addrs)?;
    let logs = TraceLogs::read(&args.cube_start, &args.cube_end, &args.vec_start, &args.vec_end)?;
    let rec = reconstruct(&logs, &buffers, profile);

    log::info!(
        "{} instructions: {} staged, {} unknown, {} named",
        rec.instrs.len(),
        rec.summary.staged,
        rec.summary.unknown,
        rec.summary.named
    );
    for diagnostic in &rec.diagnostics {
        eprintln!("{}: {}", "Warning".yellow(), diagnostic);
    }

    export::write_instr_csv(&rec.instrs, &args.out_csv)?;
    export::write_instr_json(&rec.instrs, &args.out_json)?;
    export::write_aggregate_csv(&aggregate(&rec.instrs), &args.out_agg)?;
    println!(
        "{} {}, {}, {}",
        "Wrote".green(),
        args.out_csv.display(),
        args.out_json.display(),
        args.out_agg.display()
    );

    if let Some(path) = &args.out_svg {
        let opts = SvgOptions {
            title: "FA Pipeline Schedule (from log)".to_string(),
            slot_width: args.slot_width,
            divisor: args.svg_divisor,
        };
        if svg::write_svg(&rec.tasks(), &opts, path)? {
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}
