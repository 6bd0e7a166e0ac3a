//! Software compositing for the `SoftwareComposite` tier.
//!
//! Every routine writes every output texel from the two inputs and the
//! progress value alone, so reused pool surfaces never leak stale content and
//! the same inputs always produce the same bytes. Progress `0.0` reproduces the
//! old frame and `1.0` the new frame exactly.

use crate::frame::FrameSize;

use super::{Direction, EffectParams, ParticleMode};

/// Fraction of the run over which block-flip start times are spread.
const FLIP_STAGGER: f32 = 0.5;
/// Latest start time of a particle cell.
const PARTICLE_MAX_DELAY: f32 = 0.6;
/// Portion of the run a single particle cell takes to break away.
const PARTICLE_SPAN: f32 = 1.0 - PARTICLE_MAX_DELAY;

/// Borrowed view of two equally sized tightly packed 4-byte frames.
#[derive(Clone, Copy)]
pub struct Inputs<'a> {
    pub size: FrameSize,
    pub old: &'a [u8],
    pub new: &'a [u8],
}

impl Inputs<'_> {
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.size.width as usize + x as usize) * 4
    }

    fn old_px(&self, x: u32, y: u32) -> [u8; 4] {
        texel(self.old, self.offset(x, y))
    }

    fn new_px(&self, x: u32, y: u32) -> [u8; 4] {
        texel(self.new, self.offset(x, y))
    }
}

fn texel(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

/// Renders `params` at `progress` into `out`.
///
/// Returns `false` without touching `out` when the effect has no software
/// rendition; the caller falls back to an instant cut.
pub fn composite(params: &EffectParams, inputs: Inputs<'_>, progress: f32, out: &mut [u8]) -> bool {
    let expected = inputs.size.pixel_count() * 4;
    debug_assert_eq!(inputs.old.len(), expected);
    debug_assert_eq!(inputs.new.len(), expected);
    debug_assert_eq!(out.len(), expected);

    let t = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    };
    match *params {
        EffectParams::Crossfade => crossfade(inputs.old, inputs.new, t, out),
        EffectParams::Wipe {
            direction,
            softness,
        } => wipe(inputs, direction, softness, t, out),
        EffectParams::Slide { direction } => slide(inputs, direction, t, out),
        EffectParams::Diffuse { block_px, seed } => diffuse(inputs, block_px, seed, t, out),
        EffectParams::BlockFlip {
            columns,
            rows,
            direction,
        } => block_flip(inputs, columns, rows, direction, t, out),
        EffectParams::Blinds { slats, direction } => blinds(inputs, slats, direction, t, out),
        EffectParams::Particle {
            cell_px,
            mode,
            seed,
            direction,
        } => particle(inputs, cell_px, mode, seed, direction, t, out),
        EffectParams::CardFlip { .. } => return false,
    }
    true
}

/// `round(a * b / 255)` for byte-range inputs.
#[inline]
fn mul_div255(a: u16, b: u16) -> u16 {
    let x = u32::from(a) * u32::from(b);
    ((x + 127) / 255) as u16
}

#[inline]
fn blend_byte(a: u8, b: u8, weight: u16) -> u8 {
    let inv = 255 - weight;
    (mul_div255(u16::from(a), inv) + mul_div255(u16::from(b), weight)).min(255) as u8
}

#[inline]
fn weight_of(t: f32) -> u16 {
    (t.clamp(0.0, 1.0) * 255.0).round() as u16
}

fn blend_px(a: [u8; 4], b: [u8; 4], t: f32) -> [u8; 4] {
    let w = weight_of(t);
    [
        blend_byte(a[0], b[0], w),
        blend_byte(a[1], b[1], w),
        blend_byte(a[2], b[2], w),
        blend_byte(a[3], b[3], w),
    ]
}

fn put(out: &mut [u8], at: usize, px: [u8; 4]) {
    out[at..at + 4].copy_from_slice(&px);
}

fn crossfade(old: &[u8], new: &[u8], t: f32, out: &mut [u8]) {
    let w = weight_of(t);
    for ((o, a), b) in out.iter_mut().zip(old).zip(new) {
        *o = blend_byte(*a, *b, w);
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn wipe(inputs: Inputs<'_>, direction: Direction, softness: f32, t: f32, out: &mut [u8]) {
    let FrameSize { width, height } = inputs.size;
    let soft = softness.clamp(0.0, 0.5);
    // The edge travels from -soft to 1+soft so both endpoints are fully covered.
    let edge = -soft + t * (1.0 + 2.0 * soft);
    for y in 0..height {
        for x in 0..width {
            let u = (x as f32 + 0.5) / width as f32;
            let v = (y as f32 + 0.5) / height as f32;
            let pos = direction.order_along(u, v);
            let mask = if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else {
                1.0 - smoothstep(edge - soft, edge + soft, pos)
            };
            let at = inputs.offset(x, y);
            put(
                out,
                at,
                blend_px(texel(inputs.old, at), texel(inputs.new, at), mask),
            );
        }
    }
}

fn slide(inputs: Inputs<'_>, direction: Direction, t: f32, out: &mut [u8]) {
    let FrameSize { width, height } = inputs.size;
    let axis = if direction.is_horizontal() { width } else { height };
    let shift = ((t * axis as f32).round() as u32).min(axis);
    for y in 0..height {
        for x in 0..width {
            let (a, along) = if direction.is_horizontal() { (x, y) } else { (y, x) };
            // Content moves towards `direction`; the new frame enters from the opposite edge.
            let from_old = match direction {
                Direction::Left | Direction::Up => a + shift < axis,
                Direction::Right | Direction::Down => a >= shift,
            };
            let src = match direction {
                Direction::Left | Direction::Up if from_old => a + shift,
                Direction::Left | Direction::Up => a + shift - axis,
                Direction::Right | Direction::Down if from_old => a - shift,
                Direction::Right | Direction::Down => a + axis - shift,
            };
            let (sx, sy) = if direction.is_horizontal() { (src, along) } else { (along, src) };
            let px = if from_old {
                inputs.old_px(sx, sy)
            } else {
                inputs.new_px(sx, sy)
            };
            put(out, inputs.offset(x, y), px);
        }
    }
}

/// 32-bit integer hash shared with the shader tier.
#[inline]
pub(crate) fn lowbias32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

/// Hash of a grid cell in `[0, 1)`.
#[inline]
pub(crate) fn cell_unit(x: u32, y: u32, seed: u32) -> f32 {
    let h = lowbias32(x ^ lowbias32(y ^ lowbias32(seed)));
    (h >> 8) as f32 * (1.0 / 16_777_216.0)
}

fn diffuse(inputs: Inputs<'_>, block_px: u32, seed: u32, t: f32, out: &mut [u8]) {
    let FrameSize { width, height } = inputs.size;
    let block = block_px.max(1);
    for y in 0..height {
        for x in 0..width {
            let at = inputs.offset(x, y);
            let src = if cell_unit(x / block, y / block, seed) < t {
                inputs.new
            } else {
                inputs.old
            };
            put(out, at, texel(src, at));
        }
    }
}

/// Start of cell `index` out of `count` cells spanning `len` pixels.
///
/// Rounds up so that pixel `a` lies in cell `a * count / len`.
#[inline]
fn cell_start(index: u32, count: u32, len: u32) -> u32 {
    (u64::from(index) * u64::from(len)).div_ceil(u64::from(count)) as u32
}

/// Cell holding pixel `a`, the inverse of [`cell_start`].
#[inline]
fn cell_of(a: u32, count: u32, len: u32) -> u32 {
    (u64::from(a) * u64::from(count) / u64::from(len)) as u32
}

fn block_flip(
    inputs: Inputs<'_>,
    columns: u32,
    rows: u32,
    direction: Direction,
    t: f32,
    out: &mut [u8],
) {
    let FrameSize { width, height } = inputs.size;
    let cols = columns.clamp(1, width.max(1));
    let rows = rows.clamp(1, height.max(1));
    for y in 0..height {
        let row = cell_of(y, rows, height);
        let (y0, y1) = (cell_start(row, rows, height), cell_start(row + 1, rows, height));
        for x in 0..width {
            let col = cell_of(x, cols, width);
            let (x0, x1) = (cell_start(col, cols, width), cell_start(col + 1, cols, width));
            let order = direction.order_along(
                (col as f32 + 0.5) / cols as f32,
                (row as f32 + 0.5) / rows as f32,
            );
            let local = ((t - order * FLIP_STAGGER) / (1.0 - FLIP_STAGGER)).clamp(0.0, 1.0);
            let (front, scale) = if local < 0.5 {
                (inputs.old, 1.0 - 2.0 * local)
            } else {
                (inputs.new, 2.0 * local - 1.0)
            };

            // Squash the block around its centre along the flip axis.
            let (p, lo, hi) = if direction.is_horizontal() { (x, x0, x1) } else { (y, y0, y1) };
            let centre = (lo + hi) as f32 * 0.5;
            let half = (hi - lo) as f32 * 0.5;
            let delta = p as f32 + 0.5 - centre;
            let at = inputs.offset(x, y);
            let px = if scale > 1e-4 && delta.abs() <= half * scale {
                let src = (centre + delta / scale - 0.5).round().clamp(lo as f32, (hi - 1) as f32) as u32;
                let (sx, sy) = if direction.is_horizontal() { (src, y) } else { (x, src) };
                texel(front, inputs.offset(sx, sy))
            } else {
                let mut back = blend_px(texel(inputs.old, at), texel(inputs.new, at), local);
                for c in &mut back[..3] {
                    *c /= 2;
                }
                back
            };
            put(out, at, px);
        }
    }
}

fn blinds(inputs: Inputs<'_>, slats: u32, direction: Direction, t: f32, out: &mut [u8]) {
    let FrameSize { width, height } = inputs.size;
    let axis = if direction.is_horizontal() { width } else { height };
    let count = slats.clamp(1, axis.max(1));
    for y in 0..height {
        for x in 0..width {
            let a = if direction.is_horizontal() { x } else { y };
            let slat = cell_of(a, count, axis);
            let (s0, s1) = (cell_start(slat, count, axis), cell_start(slat + 1, count, axis));
            let mut u = (a - s0) as f32 + 0.5;
            u /= (s1 - s0) as f32;
            if matches!(direction, Direction::Left | Direction::Up) {
                u = 1.0 - u;
            }
            let at = inputs.offset(x, y);
            let src = if u < t { inputs.new } else { inputs.old };
            put(out, at, texel(src, at));
        }
    }
}

fn particle(
    inputs: Inputs<'_>,
    cell_px: u32,
    mode: ParticleMode,
    seed: u32,
    direction: Direction,
    t: f32,
    out: &mut [u8],
) {
    let FrameSize { width, height } = inputs.size;
    let cell = cell_px.max(1);
    let cells_x = width.div_ceil(cell);
    let cells_y = height.div_ceil(cell);
    for y in 0..height {
        let cy = y / cell;
        let (y0, y1) = (cy * cell, ((cy + 1) * cell).min(height));
        for x in 0..width {
            let cx = x / cell;
            let (x0, x1) = (cx * cell, ((cx + 1) * cell).min(width));
            let r = cell_unit(cx, cy, seed);
            let delay = match mode {
                ParticleMode::Dissolve => PARTICLE_MAX_DELAY * r,
                ParticleMode::Sweep => {
                    let order = direction.order_along(
                        (cx as f32 + 0.5) / cells_x as f32,
                        (cy as f32 + 0.5) / cells_y as f32,
                    );
                    PARTICLE_MAX_DELAY * (0.7 * order + 0.3 * r)
                }
            };
            let local = ((t - delay) / PARTICLE_SPAN).clamp(0.0, 1.0);
            let scale = 1.0 - local;

            let centre_x = (x0 + x1) as f32 * 0.5;
            let centre_y = (y0 + y1) as f32 * 0.5;
            let dx = x as f32 + 0.5 - centre_x;
            let dy = y as f32 + 0.5 - centre_y;
            let at = inputs.offset(x, y);
            let covered = scale > 1e-4
                && dx.abs() <= (x1 - x0) as f32 * 0.5 * scale
                && dy.abs() <= (y1 - y0) as f32 * 0.5 * scale;
            let px = if covered {
                let sx = (centre_x + dx / scale - 0.5).round().clamp(x0 as f32, (x1 - 1) as f32);
                let sy = (centre_y + dy / scale - 0.5).round().clamp(y0 as f32, (y1 - 1) as f32);
                let shard = inputs.old_px(sx as u32, sy as u32);
                blend_px(shard, texel(inputs.new, at), local)
            } else {
                texel(inputs.new, at)
            };
            put(out, at, px);
        }
    }
}
