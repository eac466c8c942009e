//! Chart traces and their rasterisation to PNG.
//!
//! Function handlers append [`ChartTrace`]s during a turn; once the turn
//! finishes, [`render_png`] draws every trace onto one figure sharing a
//! single value axis.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartStyle {
    #[default]
    Bar,
    Plot,
    Scatter,
}

impl ChartStyle {
    pub const NAMES: [&'static str; 3] = ["bar", "plot", "scatter"];
}

impl FromStr for ChartStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bar" => Ok(Self::Bar),
            "plot" => Ok(Self::Plot),
            "scatter" => Ok(Self::Scatter),
            other => bail!("Unknown chart style: {}", other),
        }
    }
}

impl fmt::Display for ChartStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bar => "bar",
            Self::Plot => "plot",
            Self::Scatter => "scatter",
        };
        f.write_str(name)
    }
}

/// One data series to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartTrace {
    pub data: Vec<f64>,
    pub style: ChartStyle,
}

const PALETTE: [[u8; 3]; 5] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
];
const WHITE: [u8; 3] = [255, 255, 255];
const AXIS: [u8; 3] = [40, 40, 40];

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[WHITE[0], WHITE[1], WHITE[2], 255]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn set(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = ((y as u32 * self.width + x as u32) * 4) as usize;
        self.pixels[offset..offset + 3].copy_from_slice(&color);
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: [u8; 3]) {
        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                self.set(x, y, color);
            }
        }
    }

    fn dot(&mut self, cx: i64, cy: i64, radius: i64, color: [u8; 3]) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Bresenham line with a square pen.
    fn line(&mut self, from: (i64, i64), to: (i64, i64), pen: i64, color: [u8; 3]) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.fill_rect(x - pen / 2, y - pen / 2, x + pen / 2, y + pen / 2, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }
}

/// Draw all traces into one PNG image.
pub fn render_png(traces: &[ChartTrace], width: u32, height: u32) -> Result<Vec<u8>> {
    if traces.is_empty() {
        bail!("Nothing to render");
    }
    if width < 64 || height < 64 {
        bail!("Chart size {}x{} is too small", width, height);
    }

    let slots = traces.iter().map(|t| t.data.len()).max().unwrap_or(0).max(1);
    let (mut lo, mut hi) = (0.0f64, 0.0f64);
    for value in traces.iter().flat_map(|t| t.data.iter()) {
        lo = lo.min(*value);
        hi = hi.max(*value);
    }
    if (hi - lo).abs() < f64::EPSILON {
        hi = lo + 1.0;
    }

    let left = 40i64;
    let right = width as i64 - 20;
    let top = 20i64;
    let bottom = height as i64 - 40;
    let slot_width = (right - left) as f64 / slots as f64;

    let y_of = |v: f64| bottom - ((v - lo) / (hi - lo) * (bottom - top) as f64).round() as i64;
    let x_of = |i: usize| left + (slot_width * (i as f64 + 0.5)).round() as i64;

    let mut canvas = Canvas::new(width, height);

    let bar_traces = traces.iter().filter(|t| t.style == ChartStyle::Bar).count().max(1);
    let group = slot_width * 0.8;
    let bar_width = group / bar_traces as f64;
    let baseline = y_of(0.0);

    let mut bar_position = 0;
    for (n, trace) in traces.iter().enumerate() {
        let color = PALETTE[n % PALETTE.len()];
        match trace.style {
            ChartStyle::Bar => {
                for (i, v) in trace.data.iter().enumerate() {
                    let start = x_of(i) as f64 - group / 2.0 + bar_position as f64 * bar_width;
                    let x0 = start.round() as i64;
                    let x1 = (start + bar_width).round() as i64 - 1;
                    canvas.fill_rect(x0, baseline, x1.max(x0), y_of(*v), color);
                }
                bar_position += 1;
            }
            ChartStyle::Plot => {
                let points: Vec<(i64, i64)> = trace
                    .data
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (x_of(i), y_of(*v)))
                    .collect();
                for pair in points.windows(2) {
                    canvas.line(pair[0], pair[1], 3, color);
                }
                if let [only] = points.as_slice() {
                    canvas.dot(only.0, only.1, 2, color);
                }
            }
            ChartStyle::Scatter => {
                for (i, v) in trace.data.iter().enumerate() {
                    canvas.dot(x_of(i), y_of(*v), 5, color);
                }
            }
        }
    }

    canvas.line((left, top), (left, bottom), 1, AXIS);
    canvas.line((left, baseline), (right, baseline), 1, AXIS);

    canvas.encode()
}
