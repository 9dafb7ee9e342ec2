//! Render abstraction.
//!
//! The physical LED matrix lives outside this workspace; games only see a
//! draw surface. The contract is intentionally small: write pixels into a
//! back buffer, swap, clear. A sink may be immediate-mode underneath, but
//! callers may only assume a pixel is visible after `swap_on_vsync`.

use serde::{Deserialize, Serialize};

/// One grid cell, `(x, y)` with the origin at the top-left.
pub type Point = (i32, i32);

/// RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The house palette every program draws with.
pub mod palette {
    use super::Color;

    pub const GREEN: Color = Color::new(9, 203, 156);
    pub const BLUE: Color = Color::new(0, 55, 85);
    pub const SPRAY: Color = Color::new(117, 221, 221);
    pub const INDIGO: Color = Color::new(84, 5, 255);
    pub const BITTERSWEET: Color = Color::new(255, 90, 95);
    pub const GORSE: Color = Color::new(249, 229, 64);
    pub const CORN_FIELD: Color = Color::new(248, 244, 97);
    pub const OFF: Color = Color::new(0, 0, 0);

    /// Palette entries used for snakes and apples, in player order.
    pub const SNAKE_COLORS: [Color; 6] = [GREEN, BLUE, BITTERSWEET, GORSE, INDIGO, CORN_FIELD];
}

/// Draw surface contract.
///
/// Out-of-range writes must be ignored, not errored: games draw right up to
/// (and occasionally past) the grid edge.
pub trait RenderSink: Send {
    /// Writes one pixel into the current back buffer.
    fn set_pixel(&mut self, p: Point, color: Color);
    /// Resets the back buffer to a copy of the visible frame.
    fn create_back_buffer(&mut self);
    /// Makes the back buffer visible at the next vsync.
    fn swap_on_vsync(&mut self);
    /// Clears the back buffer to off.
    fn clear(&mut self);
}

/// In-memory draw surface, used by the idle program and by tests.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    size: i32,
    front: Vec<Color>,
    back: Vec<Color>,
    swaps: u64,
}

impl PixelGrid {
    pub fn new(size: i32) -> Self {
        let n = (size * size) as usize;
        Self {
            size,
            front: vec![palette::OFF; n],
            back: vec![palette::OFF; n],
            swaps: 0,
        }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    fn index(&self, (x, y): Point) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.size || y >= self.size {
            return None;
        }
        Some((y * self.size + x) as usize)
    }

    /// Visible color of one pixel.
    pub fn get(&self, p: Point) -> Color {
        self.index(p).map(|i| self.front[i]).unwrap_or(palette::OFF)
    }

    /// All visible lit pixels.
    pub fn lit(&self) -> Vec<Point> {
        (0..self.size)
            .flat_map(|y| (0..self.size).map(move |x| (x, y)))
            .filter(|&p| self.get(p) != palette::OFF)
            .collect()
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps
    }
}

impl RenderSink for PixelGrid {
    fn set_pixel(&mut self, p: Point, color: Color) {
        if let Some(i) = self.index(p) {
            self.back[i] = color;
        }
    }

    fn create_back_buffer(&mut self) {
        self.back.copy_from_slice(&self.front);
    }

    fn swap_on_vsync(&mut self) {
        self.front.copy_from_slice(&self.back);
        self.swaps += 1;
    }

    fn clear(&mut self) {
        self.back.fill(palette::OFF);
    }
}

/// 3x5 glyphs for score rendering. Glyph cells advance 6 pixels per
/// character.
pub const GLYPH_ADVANCE: i32 = 6;

const GLYPHS: &[(char, [&str; 5])] = &[
    ('0', ["###", "#.#", "#.#", "#.#", "###"]),
    ('1', [".#.", "##.", ".#.", ".#.", "###"]),
    ('2', ["###", "..#", "###", "#..", "###"]),
    ('3', ["###", "..#", "###", "..#", "###"]),
    ('4', ["#.#", "#.#", "###", "..#", "..#"]),
    ('5', ["###", "#..", "###", "..#", "###"]),
    ('6', ["###", "#..", "###", "#.#", "###"]),
    ('7', ["###", "..#", "..#", ".#.", ".#."]),
    ('8', ["###", "#.#", "###", "#.#", "###"]),
    ('9', ["###", "#.#", "###", "..#", "###"]),
    ('-', ["...", "...", "###", "...", "..."]),
];

/// Pixel points of one glyph at the given origin. Unknown characters render
/// as nothing.
pub fn glyph_points(ch: char, origin: Point) -> Vec<Point> {
    let Some((_, rows)) = GLYPHS.iter().find(|(g, _)| *g == ch) else {
        return Vec::new();
    };
    let mut points = Vec::new();
    for (dy, row) in rows.iter().enumerate() {
        for (dx, cell) in row.bytes().enumerate() {
            if cell == b'#' {
                points.push((origin.0 + dx as i32, origin.1 + dy as i32));
            }
        }
    }
    points
}

/// Pixel points of a whole number rendered left-to-right from `origin`.
pub fn number_points(value: i32, origin: Point) -> Vec<Point> {
    value
        .to_string()
        .chars()
        .enumerate()
        .flat_map(|(i, ch)| glyph_points(ch, (origin.0 + GLYPH_ADVANCE * i as i32, origin.1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_visible_only_after_swap() {
        let mut grid = PixelGrid::new(8);
        grid.set_pixel((1, 1), palette::GREEN);
        assert_eq!(grid.get((1, 1)), palette::OFF);
        grid.swap_on_vsync();
        assert_eq!(grid.get((1, 1)), palette::GREEN);
    }

    #[test]
    fn out_of_range_writes_are_ignored() {
        let mut grid = PixelGrid::new(8);
        grid.set_pixel((-1, 3), palette::GREEN);
        grid.set_pixel((3, 8), palette::GREEN);
        grid.swap_on_vsync();
        assert!(grid.lit().is_empty());
    }

    #[test]
    fn glyphs_cover_score_characters() {
        for ch in "0123456789-".chars() {
            assert!(!glyph_points(ch, (0, 0)).is_empty(), "missing glyph {ch}");
        }
    }

    #[test]
    fn number_points_advance_per_digit() {
        let one_digit = number_points(8, (10, 10));
        let two_digits = number_points(88, (10, 10));
        assert!(two_digits.len() > one_digit.len());
        assert!(two_digits.iter().any(|&(x, _)| x >= 10 + GLYPH_ADVANCE));
    }
}
