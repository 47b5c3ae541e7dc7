//! SVG timeline renderer
//!
//! Layout: four stage bands (qk, p, pv, gu) with a load/comp/store sub-row
//! each, followed by one merged row per core. Times are divided by
//! `divisor` and scaled by `slot_width` pixels per unit.

use std::path::Path;

use crate::error::TimelineResult;
use crate::export::write_text;
use crate::stage::{Core, StageKind};
use crate::task::{Role, Task};

const LEFT: u64 = 120;
const HEIGHT: u64 = 440;
const MINI_H: u64 = 12;
const MINI_GAP: u64 = 4;

/// Rendering options
#[derive(Debug, Clone)]
pub struct SvgOptions {
    pub title: String,
    pub slot_width: u64,
    /// Time units per rendered slot
    pub divisor: u64,
}

impl Default for SvgOptions {
    fn default() -> Self {
        Self {
            title: "FA Pipeline Schedule".to_string(),
            slot_width: 8,
            divisor: 1,
        }
    }
}

fn band_top(stage: StageKind) -> u64 {
    match stage {
        StageKind::Qk => 60,
        StageKind::P => 120,
        StageKind::Pv => 180,
        StageKind::Gu => 240,
    }
}

fn core_row(core: Core) -> u64 {
    match core {
        Core::Cube => 320,
        Core::Vector => 380,
    }
}

/// `(fill, stroke)`
fn colors(stage: StageKind) -> (&'static str, &'static str) {
    match stage {
        StageKind::Qk => ("#1f77b4", "#1a4f7a"),
        StageKind::P => ("#ff9933", "#c66f0a"),
        StageKind::Pv => ("#2ca25f", "#1f7a47"),
        StageKind::Gu => ("#9467bd", "#6c3f8b"),
    }
}

fn lane_offset(role: Role) -> u64 {
    role.lane() as u64 * (MINI_H + MINI_GAP)
}

struct Canvas<'a> {
    opts: &'a SvgOptions,
    div: u64,
    parts: Vec<String>,
}

impl<'a> Canvas<'a> {
    fn x_at(&self, t: f64) -> f64 {
        LEFT as f64 + self.opts.slot_width as f64 * (t / self.div as f64)
    }

    fn y_center(&self, task: &Task) -> f64 {
        (band_top(task.stage) + lane_offset(task.role)) as f64 + MINI_H as f64 / 2.0
    }

    fn rect(&mut self, task: &Task, y: u64) {
        let x = LEFT + self.opts.slot_width * (task.start / self.div);
        let w = self.opts.slot_width * (task.end / self.div - task.start / self.div).max(1);
        let (fill, stroke) = colors(task.stage);
        self.parts.push(format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\" rx=\"3\" stroke=\"{}\" stroke-width=\"1\" />",
            x, y, w, MINI_H, fill, stroke
        ));
        self.parts.push(format!(
            "  <text x=\"{}\" y=\"{:.1}\" font-family=\"Arial\" font-size=\"10\" fill=\"#fff\">{}({})</text>",
            x + 4,
            (y + MINI_H) as f64 - 3.0,
            task.label,
            task.tile
        ));
    }

    fn dependency(&mut self, store: &Task, load: &Task) {
        let x1 = self.x_at((store.start + store.end) as f64 / 2.0);
        let x2 = self.x_at(load.start as f64);
        let y1 = self.y_center(store);
        let y2 = self.y_center(load) - 4.0;
        self.parts.push(format!(
            "  <path d=\"M{:.1} {:.1} L{:.1} {:.1} L{:.1} {:.1}\" stroke=\"#333\" stroke-width=\"1.5\" fill=\"none\" marker-end=\"url(#arrowhead)\" />",
            x1, y1, x1, y2, x2, y2
        ));
    }

    fn intra(&mut self, from: &Task, to: &Task) {
        let x1 = self.x_at(from.end as f64);
        let x2 = self.x_at(to.start as f64);
        self.parts.push(format!(
            "  <path d=\"M{:.1} {:.1} L{:.1} {:.1}\" stroke=\"#1b75d1\" stroke-width=\"1.2\" fill=\"none\" marker-end=\"url(#arrowhead-intra)\" />",
            x1,
            self.y_center(from),
            x2,
            self.y_center(to)
        ));
    }
}

fn of_tile<'t>(tasks: &'t [Task], stage: StageKind, tile: usize, pick: fn(Role) -> bool) -> Vec<&'t Task> {
    let mut v: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.stage == stage && t.tile == tile && pick(t.role))
        .collect();
    v.sort_by_key(|t| t.start);
    v
}

fn is_load(r: Role) -> bool {
    matches!(r, Role::Load(_))
}

fn is_compute(r: Role) -> bool {
    r == Role::Compute
}

fn is_store(r: Role) -> bool {
    r == Role::Store
}

/// Render a canonical task list; `None` when there is nothing to draw
pub fn render(tasks: &[Task], opts: &SvgOptions) -> Option<String> {
    let max_end = tasks.iter().map(|t| t.end).max()?;
    let div = opts.divisor.max(1);
    let tmax = (max_end + div - 1) / div;
    let width = LEFT + opts.slot_width * tmax + 40;

    let mut c = Canvas {
        opts,
        div,
        parts: Vec::new(),
    };
    c.parts.push("<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string());
    c.parts.push(format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
        w = width,
        h = HEIGHT
    ));
    c.parts.push(format!("  <rect width=\"{}\" height=\"{}\" fill=\"#fff\" />", width, HEIGHT));
    c.parts.push(
        [
            "  <defs>",
            "    <marker id=\"arrowhead\" markerWidth=\"10\" markerHeight=\"7\" refX=\"10\" refY=\"3.5\" orient=\"auto\">",
            "      <polygon points=\"0 0 10 3.5 0 7\" fill=\"#333\" />",
            "    </marker>",
            "    <marker id=\"arrowhead-intra\" markerWidth=\"10\" markerHeight=\"7\" refX=\"10\" refY=\"3.5\" orient=\"auto\">",
            "      <polygon points=\"0 0 10 3.5 0 7\" fill=\"#1b75d1\" />",
            "    </marker>",
            "  </defs>",
        ]
        .join("\n"),
    );
    c.parts.push(format!(
        "  <text x=\"20\" y=\"28\" font-family=\"Arial\" font-size=\"16\" font-weight=\"bold\" fill=\"#222\">{}</text>",
        opts.title
    ));

    c.parts.push("  <g stroke=\"#f2f2f2\" stroke-width=\"1\">".to_string());
    for t in (0..=tmax).step_by(10) {
        let x = LEFT + opts.slot_width * t;
        c.parts.push(format!("    <line x1=\"{x}\" y1=\"40\" x2=\"{x}\" y2=\"280\" />", x = x));
    }
    c.parts.push("  </g>".to_string());

    for stage in StageKind::CHAIN {
        c.parts.push(format!(
            "  <text x=\"20\" y=\"{}\" font-family=\"Arial\" font-size=\"13\" fill=\"#222\">{} ({})</text>",
            band_top(stage) + 20,
            stage.name(),
            stage.core()
        ));
    }
    for core in Core::ALL {
        let members: Vec<&str> = StageKind::CHAIN
            .into_iter()
            .filter(|s| s.core() == core)
            .map(|s| s.abbr())
            .collect();
        c.parts.push(format!(
            "  <text x=\"20\" y=\"{}\" font-family=\"Arial\" font-size=\"13\" fill=\"#222\">{} timeline ({})</text>",
            core_row(core) + 20,
            core,
            members.join("+")
        ));
    }

    for task in tasks {
        c.rect(task, band_top(task.stage) + lane_offset(task.role));
    }
    let mut merged: Vec<&Task> = tasks.iter().collect();
    merged.sort_by_key(|t| (t.start, t.end));
    for task in merged {
        c.rect(task, core_row(task.core) + lane_offset(task.role));
    }

    let max_tile = tasks.iter().map(|t| t.tile).max().unwrap_or(0);
    for tile in 0..=max_tile {
        for stage in StageKind::CHAIN {
            let Some(consumer) = stage.consumer() else {
                continue;
            };
            let stores = of_tile(tasks, stage, tile, is_store);
            let loads = of_tile(tasks, consumer, tile, is_load);
            let Some(store) = stores.iter().max_by_key(|t| t.end) else {
                continue;
            };
            let Some(load) = loads.iter().find(|l| l.start >= store.end).or(loads.first()) else {
                continue;
            };
            c.dependency(store, load);
        }

        for stage in StageKind::CHAIN {
            let load = of_tile(tasks, stage, tile, is_load).first().copied();
            let comp = of_tile(tasks, stage, tile, is_compute).first().copied();
            let store = of_tile(tasks, stage, tile, is_store).first().copied();
            let busy = |t: &Task| t.start != t.end;
            if let (Some(l), Some(k)) = (load, comp) {
                if busy(l) && busy(k) {
                    c.intra(l, k);
                }
            }
            if let (Some(k), Some(s)) = (comp, store) {
                if busy(k) && busy(s) {
                    c.intra(k, s);
                }
            }
        }
    }

    c.parts.push("</svg>".to_string());
    Some(c.parts.join("\n"))
}

/// Write the rendering to `path`; an empty task list writes nothing
pub fn write_svg(tasks: &[Task], opts: &SvgOptions, path: impl AsRef<Path>) -> TimelineResult<bool> {
    match render(tasks, opts) {
        Some(svg) => {
            write_text(path, &svg)?;
            Ok(true)
        }
        None => {
            log::warn!("no tasks to render, skipping {}", path.as_ref().display());
            Ok(false)
        }
    }
}
