//! 2048 move/merge algorithm plus its display program.
//!
//! The board is a 4x4 grid of tile values (0 = empty). A move shifts every
//! line toward the chosen edge, fusing the first equal adjacent pair from
//! the leading edge, at most one fusion per destination cell. Discrete tile
//! moves are reconstructed afterwards for animation only; the shift itself
//! is the source of truth.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use matrix_shared::net::{Command, Direction};
use matrix_shared::render::{palette, Color, RenderSink};

use crate::rendezvous::RendezvousServer;
use crate::scheduler::{FrameScheduler, TickResult};
use crate::supervisor::{Program, ProgramCtx};

pub const FPS: u64 = 20;

const GRID: usize = 4;
/// Pixel origin of each tile row/column on the 64x64 surface.
const TILE_START: [i32; 4] = [1, 17, 33, 49];
const TILE_SIZE: i32 = 14;

/// One reconstructed tile displacement, used for animation, not logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// (row, col) before the shift.
    pub origin: (usize, usize),
    pub origin_tile: u32,
    /// (row, col) after the shift.
    pub dest: (usize, usize),
    pub dest_tile: u32,
    /// Cells travelled along the line.
    pub dist: usize,
    pub is_fusion: bool,
}

/// Outcome of applying one directional move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Nothing changed in any line; no tile spawns.
    Unmoved,
    Moved {
        moves: Vec<Move>,
        /// (row, col, value) of the spawned tile.
        spawned: (usize, usize, u32),
    },
    /// The spawn filled the last empty cell and no direction can move:
    /// distinct terminal signal, never a silent no-op.
    Stuck { moves: Vec<Move> },
}

/// Compacts one line toward index 0, fusing the first equal adjacent pair
/// encountered from the leading edge; at most one fusion per destination.
pub fn shift_line(values: [u32; 4]) -> [u32; 4] {
    let compact: Vec<u32> = values.iter().copied().filter(|&v| v != 0).collect();
    let mut out = [0u32; 4];
    let mut w = 0;
    let mut r = 0;
    while r < compact.len() {
        if r + 1 < compact.len() && compact[r] == compact[r + 1] {
            out[w] = compact[r] * 2;
            r += 2;
        } else {
            out[w] = compact[r];
            r += 1;
        }
        w += 1;
    }
    out
}

/// Reconstructs per-tile moves by matching each post-shift value back to
/// its source(s) in original order: first match wins, a fusion consumes
/// exactly two sources. Returns (origin_index, dest_index, is_fusion) with
/// origin != dest.
pub fn find_moves(after: [u32; 4], before: [u32; 4]) -> Vec<(usize, usize, bool)> {
    let mut moves = Vec::new();
    let mut b = 0;
    for (a, &value) in after.iter().enumerate() {
        if value == 0 {
            break;
        }
        let mut first_half: Option<usize> = None;
        while b < 4 {
            let src = before[b];
            if src == value && first_half.is_none() {
                if b != a {
                    moves.push((b, a, false));
                }
                b += 1;
                break;
            } else if src != 0 && src == value / 2 {
                match first_half {
                    None => {
                        if b != a {
                            moves.push((b, a, false));
                        }
                        first_half = Some(b);
                        b += 1;
                    }
                    Some(_) => {
                        moves.push((b, a, true));
                        b += 1;
                        break;
                    }
                }
            } else {
                b += 1;
            }
        }
    }
    moves
}

/// 4x4 board of tile values, 0 = empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[u32; GRID]; GRID],
}

impl Board {
    pub fn empty() -> Self {
        Self {
            cells: [[0; GRID]; GRID],
        }
    }

    /// Starts a game with one spawned tile.
    pub fn new_game(rng: &mut StdRng) -> Self {
        let mut board = Self::empty();
        board.spawn(rng);
        board
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.cells[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        self.cells[row][col] = value;
    }

    /// Maps (lane, position-along-move) to (row, col) so every direction
    /// reads its lines leading-edge first.
    fn line_cell(dir: Direction, lane: usize, i: usize) -> (usize, usize) {
        match dir {
            Direction::Up => (i, lane),
            Direction::Down => (GRID - 1 - i, lane),
            Direction::Left => (lane, i),
            Direction::Right => (lane, GRID - 1 - i),
        }
    }

    fn line(&self, dir: Direction, lane: usize) -> [u32; 4] {
        let mut out = [0; 4];
        for (i, v) in out.iter_mut().enumerate() {
            let (r, c) = Self::line_cell(dir, lane, i);
            *v = self.cells[r][c];
        }
        out
    }

    pub fn empty_cells(&self) -> Vec<(usize, usize)> {
        (0..GRID)
            .flat_map(|r| (0..GRID).map(move |c| (r, c)))
            .filter(|&(r, c)| self.cells[r][c] == 0)
            .collect()
    }

    /// True if some direction still changes the board.
    pub fn can_move(&self) -> bool {
        [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ]
        .into_iter()
        .any(|dir| (0..GRID).any(|lane| shift_line(self.line(dir, lane)) != self.line(dir, lane)))
    }

    /// Spawns a tile (2 w.p. 0.9, else 4) in a uniformly random empty cell.
    fn spawn(&mut self, rng: &mut StdRng) -> (usize, usize, u32) {
        let empty = self.empty_cells();
        let (row, col) = empty[rng.gen_range(0..empty.len())];
        let value = if rng.gen::<f64>() <= 0.1 { 4 } else { 2 };
        self.cells[row][col] = value;
        (row, col, value)
    }

    /// Shifts every lane toward `dir`; if anything changed, spawns a tile
    /// and checks for the stuck condition.
    pub fn apply_move(&mut self, dir: Direction, rng: &mut StdRng) -> MoveOutcome {
        let mut moves = Vec::new();

        for lane in 0..GRID {
            let before = self.line(dir, lane);
            let after = shift_line(before);
            if after == before {
                continue;
            }
            for (orig, dest, is_fusion) in find_moves(after, before) {
                moves.push(Move {
                    origin: Self::line_cell(dir, lane, orig),
                    origin_tile: before[orig],
                    dest: Self::line_cell(dir, lane, dest),
                    dest_tile: after[dest],
                    dist: orig - dest,
                    is_fusion,
                });
            }
            for (i, &v) in after.iter().enumerate() {
                let (r, c) = Self::line_cell(dir, lane, i);
                self.cells[r][c] = v;
            }
        }

        if moves.is_empty() {
            return MoveOutcome::Unmoved;
        }

        let was_last_empty = self.empty_cells().len() == 1;
        let spawned = self.spawn(rng);
        if was_last_empty && !self.can_move() {
            return MoveOutcome::Stuck { moves };
        }
        MoveOutcome::Moved { moves, spawned }
    }

    pub fn value_sum(&self) -> u32 {
        self.cells.iter().flatten().sum()
    }
}

fn tile_color(value: u32) -> Color {
    if value == 0 {
        return palette::OFF;
    }
    let colors = [
        palette::GREEN,
        palette::SPRAY,
        palette::INDIGO,
        palette::BITTERSWEET,
        palette::GORSE,
        palette::CORN_FIELD,
        palette::BLUE,
    ];
    colors[(value.trailing_zeros() as usize - 1) % colors.len()]
}

fn draw_board(board: &Board, sink: &mut dyn RenderSink) {
    sink.clear();
    for row in 0..GRID {
        for col in 0..GRID {
            let color = tile_color(board.get(row, col));
            if color == palette::OFF {
                continue;
            }
            for dy in 0..TILE_SIZE {
                for dx in 0..TILE_SIZE {
                    sink.set_pixel((TILE_START[col] + dx, TILE_START[row] + dy), color);
                }
            }
        }
    }
    sink.swap_on_vsync();
}

pub struct Play2048Program;

#[async_trait]
impl Program for Play2048Program {
    fn name(&self) -> &'static str {
        "2048"
    }

    async fn run(self: Box<Self>, ctx: ProgramCtx) -> anyhow::Result<()> {
        let server = RendezvousServer::bind(&ctx.cfg.listen_addr).await?;
        info!(addr = %server.local_addr()?, "2048 rendezvous listening");
        // Single allowed name: the first connection is auto-assigned.
        let mut session = server.register(1, &["P1"]);
        session.wait_for_quorum().await;

        let mut sink = ctx.sink.lock().await;
        let mut rng = StdRng::seed_from_u64(rand::random());
        let mut board = Board::new_game(&mut rng);
        draw_board(&board, sink.as_mut());

        let scheduler = FrameScheduler::new(Duration::from_micros(1_000_000 / FPS));
        let reason = scheduler
            .run(&mut session, |inputs| {
                let Some(Command::Move(dir)) = inputs.command("P1") else {
                    return TickResult::Continue;
                };
                match board.apply_move(dir, &mut rng) {
                    MoveOutcome::Unmoved => TickResult::Continue,
                    MoveOutcome::Moved { .. } => {
                        draw_board(&board, sink.as_mut());
                        TickResult::Continue
                    }
                    MoveOutcome::Stuck { .. } => {
                        draw_board(&board, sink.as_mut());
                        TickResult::Terminal("board stuck, no legal move left".to_string())
                    }
                }
            })
            .await
            .context("2048 tick loop")?;
        info!(%reason, "2048 ended");
        Ok(())
    }
}
