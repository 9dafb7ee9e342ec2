//! Pong, the canonical scheduler instance.
//!
//! 2-4 players. P1/P2 own the left/right paddles; when P3 or P4 bind
//! mid-game the top/bottom walls turn into paddles, and the transition
//! only ever adds capability. Ball speed ramps with rally length, a goal
//! mutates score but never phase, and all drawing is diff-based: per-entity
//! lit pixel sets, only the delta emitted each tick.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use matrix_shared::net::{Command, Direction};
use matrix_shared::render::{number_points, palette, Color, Point, RenderSink};

use crate::rendezvous::RendezvousServer;
use crate::scheduler::{FrameScheduler, TickInputs, TickResult};
use crate::supervisor::{Program, ProgramCtx};

pub const PLAYER_NAMES: [&str; 4] = ["P1", "P2", "P3", "P4"];
pub const MIN_PLAYERS: usize = 2;
pub const FPS: u64 = 40;

pub const BOARD_SIZE: i32 = 64;
const PADDLE_SIZE: i32 = 10;
const BOOSTED_PADDLE_SIZE: i32 = 6;
const BOOST_DIST: i32 = 24;
const BOOST_FRAMES: u32 = 30;
const MAX_ANGLE_DEG: f64 = 70.0;

pub const BORDER_MIN: i32 = 3;
pub const BORDER_MAX: i32 = BOARD_SIZE - 4;

// Coefficients of the rally speed ramp a*ln(b*n + d) + c.
const SPEED_A: f64 = 0.4;
const SPEED_B: f64 = 1.5;
const SPEED_C: f64 = 0.85;
const SPEED_D: f64 = 0.5;

const PADDLE_COLORS: [Color; 4] = [
    palette::BITTERSWEET,
    palette::INDIGO,
    palette::SPRAY,
    palette::GORSE,
];

/// Ball speed after `bounces` reflections; strictly increasing.
pub fn ball_speed(bounces: u32) -> f64 {
    SPEED_A * (SPEED_B * f64::from(bounces) + SPEED_D).ln() + SPEED_C
}

/// One paddle: position of its leading edge along its border, plus the
/// boost countdown (0 = not boosted).
#[derive(Debug, Clone, Copy)]
pub struct Paddle {
    pub pos: i32,
    pub boost: u32,
}

impl Paddle {
    fn new() -> Self {
        Self {
            pos: (BOARD_SIZE - PADDLE_SIZE) / 2,
            boost: 0,
        }
    }

    pub fn size(&self) -> i32 {
        if self.boost > 0 {
            BOOSTED_PADDLE_SIZE
        } else {
            PADDLE_SIZE
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
    pub bounces: u32,
    /// Paddle that last touched the ball; scores on the next goal.
    pub last_touch: Option<usize>,
}

/// The whole simulation state, threaded explicitly through the update
/// functions. Paddle indices: 0 left, 1 right, 2 top, 3 bottom.
pub struct PongState {
    pub paddles: [Paddle; 4],
    pub scores: [i32; 4],
    pub ball: Ball,
    /// 2..=4, one-directional: walls become paddles, never the reverse.
    pub active_players: usize,
    rng: StdRng,
}

impl PongState {
    pub fn new(seed: u64) -> Self {
        let mut state = Self {
            paddles: [Paddle::new(); 4],
            // Scores start at -1; each player's bootstrap goal (+2) brings
            // its display to 1.
            scores: [-1; 4],
            ball: Ball {
                x: 0.0,
                y: 0.0,
                dx: 0.0,
                dy: 0.0,
                bounces: 0,
                last_touch: None,
            },
            active_players: 2,
            rng: StdRng::seed_from_u64(seed),
        };
        state.ball = state.serve();
        state
    }

    /// Places the ball at center with a randomized angle biased toward one
    /// of the currently active walls. Resets bounce counter and last touch.
    fn serve(&mut self) -> Ball {
        let mut half_turns = vec![0.0, 1.0]; // right, left
        if self.active_players >= 3 {
            half_turns.push(0.5); // vertical, once a third wall is live
        }
        if self.active_players >= 4 {
            half_turns.push(1.5);
        }
        let base = half_turns[self.rng.gen_range(0..half_turns.len())];
        let jitter = self
            .rng
            .gen_range(-MAX_ANGLE_DEG / 360.0..MAX_ANGLE_DEG / 360.0);
        let angle = (jitter + base) * std::f64::consts::PI;
        let speed = ball_speed(0);
        Ball {
            x: f64::from(BOARD_SIZE) / 2.0,
            y: f64::from(BOARD_SIZE) / 2.0,
            dx: angle.cos() * speed,
            dy: angle.sin() * speed,
            bounces: 0,
            last_touch: None,
        }
    }

    /// Applies this tick's commands to every active paddle (absent command
    /// still ticks the boost countdown).
    pub fn apply_commands(&mut self, cmds: [Option<Command>; 4]) {
        for (i, cmd) in cmds.into_iter().enumerate() {
            if i < self.active_players {
                steer(&mut self.paddles[i], cmd, i >= 2);
            }
        }
    }

    /// Activates the paddle for player index `idx` (2 or 3), fires its
    /// bootstrap goal, and returns the players whose score changed.
    pub fn activate_player(&mut self, idx: usize) -> Vec<usize> {
        if idx < 2 || idx > 3 || self.active_players > idx {
            return Vec::new();
        }
        self.active_players = idx + 1;
        self.goal(Some(idx), None)
    }

    /// Scoring rule: +2 to the scorer (last toucher), -1 to the player whose
    /// wall was crossed. Returns the players whose score changed.
    fn goal(&mut self, scorer: Option<usize>, conceder: Option<usize>) -> Vec<usize> {
        let mut changed = Vec::new();
        if let Some(p) = scorer {
            self.scores[p] += 2;
            changed.push(p);
        }
        if let Some(p) = conceder {
            self.scores[p] -= 1;
            if !changed.contains(&p) {
                changed.push(p);
            }
        }
        changed
    }

    fn paddle_spans(&self, idx: usize, coord: f64) -> bool {
        let p = &self.paddles[idx];
        // Inclusive ±1 margin around the paddle span.
        coord >= f64::from(p.pos - 1) && coord <= f64::from(p.pos + p.size() + 1)
    }

    /// Velocity after bouncing off a left/right paddle at height `yb`.
    fn bounce_off_side(&self, yb: f64, paddle_pos: i32, dx_sign: f64) -> (f64, f64) {
        let dist = yb - (f64::from(paddle_pos) + f64::from(PADDLE_SIZE) / 2.0);
        let angle = (dist / f64::from(PADDLE_SIZE)) * MAX_ANGLE_DEG.to_radians();
        let speed = ball_speed(self.ball.bounces);
        (angle.cos() * speed * dx_sign, angle.sin() * speed)
    }

    /// Velocity after bouncing off a top/bottom paddle at `xb`.
    fn bounce_off_face(&self, xb: f64, paddle_pos: i32, dy_sign: f64) -> (f64, f64) {
        let dist = xb - (f64::from(paddle_pos) + f64::from(PADDLE_SIZE) / 2.0);
        let angle = (dist / f64::from(PADDLE_SIZE)) * MAX_ANGLE_DEG.to_radians();
        let speed = ball_speed(self.ball.bounces);
        (angle.sin() * speed, angle.cos() * speed * dy_sign)
    }

    fn score_and_serve(&mut self, conceder: usize, nx: &mut f64, ny: &mut f64) -> Vec<usize> {
        let scorer = self.ball.last_touch;
        let changed = self.goal(scorer, Some(conceder));
        self.ball = self.serve();
        *nx = self.ball.x;
        *ny = self.ball.y;
        changed
    }

    /// Advances the ball one tick, resolving border crossings: bounce off a
    /// paddle (speed ramp, angle from offset), reflect off a plain wall, or
    /// score a goal and re-serve. The ball always ends up back inside the
    /// borders. Returns the players whose score changed.
    pub fn advance_ball(&mut self) -> Vec<usize> {
        let mut changed = Vec::new();
        let mut nx = self.ball.x + self.ball.dx;
        let mut ny = self.ball.y + self.ball.dy;
        let bmin = f64::from(BORDER_MIN);
        let bmax = f64::from(BORDER_MAX);

        if ny < bmin {
            if self.active_players < 3 {
                // Plain wall: mirror, flip sign, no bounce count.
                ny = bmin - (ny - bmin);
                self.ball.dy = -self.ball.dy;
            } else if self.paddle_spans(2, nx) {
                ny = bmin - (ny - bmin);
                self.ball.bounces += 1;
                let (dx, dy) = self.bounce_off_face(nx, self.paddles[2].pos, 1.0);
                self.ball.dx = dx;
                self.ball.dy = dy;
                self.ball.last_touch = Some(2);
            } else {
                changed.extend(self.score_and_serve(2, &mut nx, &mut ny));
            }
        } else if ny > bmax {
            if self.active_players < 4 {
                ny = bmax - (ny - bmax);
                self.ball.dy = -self.ball.dy;
            } else if self.paddle_spans(3, nx) {
                ny = bmax - (ny - bmax);
                self.ball.bounces += 1;
                let (dx, dy) = self.bounce_off_face(nx, self.paddles[3].pos, -1.0);
                self.ball.dx = dx;
                self.ball.dy = dy;
                self.ball.last_touch = Some(3);
            } else {
                changed.extend(self.score_and_serve(3, &mut nx, &mut ny));
            }
        }

        if nx < bmin {
            if self.paddle_spans(0, ny) {
                nx = bmin - (nx - bmin);
                self.ball.bounces += 1;
                let (dx, dy) = self.bounce_off_side(ny, self.paddles[0].pos, 1.0);
                self.ball.dx = dx;
                self.ball.dy = dy;
                self.ball.last_touch = Some(0);
            } else {
                changed.extend(self.score_and_serve(0, &mut nx, &mut ny));
            }
        } else if nx > bmax {
            if self.paddle_spans(1, ny) {
                nx = bmax - (nx - bmax);
                self.ball.bounces += 1;
                let (dx, dy) = self.bounce_off_side(ny, self.paddles[1].pos, -1.0);
                self.ball.dx = dx;
                self.ball.dy = dy;
                self.ball.last_touch = Some(1);
            } else {
                changed.extend(self.score_and_serve(1, &mut nx, &mut ny));
            }
        }

        self.ball.x = nx;
        self.ball.y = ny;
        changed
    }

    pub fn ball_point(&self) -> Point {
        (self.ball.x.round() as i32, self.ball.y.round() as i32)
    }
}

/// One tick of control for a single paddle. `horizontal` paddles listen to
/// left/right, vertical ones to up/down; everything else is ignored.
fn steer(paddle: &mut Paddle, cmd: Option<Command>, horizontal: bool) {
    let min = BORDER_MIN;
    let max = BORDER_MAX - paddle.size();

    // (is_boost, toward_max)
    let action = cmd.and_then(|c| match (c, horizontal) {
        (Command::Move(Direction::Up), false) | (Command::Move(Direction::Left), true) => {
            Some((false, false))
        }
        (Command::Move(Direction::Down), false) | (Command::Move(Direction::Right), true) => {
            Some((false, true))
        }
        (Command::Boost(Direction::Up), false) | (Command::Boost(Direction::Left), true) => {
            Some((true, false))
        }
        (Command::Boost(Direction::Down), false) | (Command::Boost(Direction::Right), true) => {
            Some((true, true))
        }
        _ => None,
    });

    match action {
        Some((false, false)) if paddle.pos > min => {
            paddle.boost = paddle.boost.saturating_sub(1);
            paddle.pos -= 1;
        }
        Some((true, false)) if paddle.pos > min && paddle.boost == 0 => {
            paddle.boost = BOOST_FRAMES;
            paddle.pos = (paddle.pos - BOOST_DIST + (PADDLE_SIZE - BOOSTED_PADDLE_SIZE)).max(min);
        }
        Some((false, true)) if paddle.pos < max => {
            paddle.boost = paddle.boost.saturating_sub(1);
            paddle.pos += 1;
        }
        Some((true, true)) if paddle.pos < max && paddle.boost == 0 => {
            paddle.boost = BOOST_FRAMES;
            paddle.pos = (paddle.pos + BOOST_DIST).min(max);
        }
        _ => {
            if paddle.boost == 1 {
                // Final boost frame: restore normal size and re-center the
                // paddle around the old boosted position.
                paddle.boost = 0;
                paddle.pos -= (PADDLE_SIZE - BOOSTED_PADDLE_SIZE) / 2;
            } else {
                paddle.boost = paddle.boost.saturating_sub(1);
            }
        }
    }

    // A move on the final boost frame restores normal size with the paddle
    // possibly past the shorter limit; resolve it here so the position is
    // always inside [BORDER_MIN, BORDER_MAX - size].
    paddle.pos = paddle.pos.clamp(min, BORDER_MAX - paddle.size());
}

fn paddle_points(idx: usize, pos: i32, size: i32) -> HashSet<Point> {
    let base = if idx % 2 == 0 { 1 } else { BOARD_SIZE - 3 };
    (pos..pos + size)
        .flat_map(|t| [(base, t), (base + 1, t)])
        .map(|(a, b)| if idx < 2 { (a, b) } else { (b, a) })
        .collect()
}

fn score_points(score: i32, idx: usize) -> HashSet<Point> {
    let len = score.to_string().len() as i32;
    let origin_x = BOARD_SIZE * if idx % 2 == 1 { 3 } else { 1 } / 4 - 3 * len;
    let origin_y = if idx < 2 { 6 } else { 50 };
    number_points(score, (origin_x, origin_y)).into_iter().collect()
}

fn middle_line_points() -> HashSet<Point> {
    let x = BOARD_SIZE / 2;
    (0..=BOARD_SIZE)
        .filter(|y| 0 < y % 4 && y % 4 < 3)
        .map(|y| (x, y))
        .collect()
}

fn border_points() -> HashSet<Point> {
    let mut pts = HashSet::new();
    for x in (BORDER_MIN - 1)..=(BORDER_MAX + 1) {
        pts.insert((x, BORDER_MIN - 1));
        pts.insert((x, BORDER_MAX + 1));
    }
    for y in (BORDER_MIN - 1)..=(BORDER_MAX + 1) {
        pts.insert((BORDER_MIN - 1, y));
        pts.insert((BORDER_MAX + 1, y));
    }
    pts
}

/// Simulation plus the lit-pixel bookkeeping that makes diff rendering
/// possible.
pub struct PongGame {
    pub state: PongState,
    paddle_px: [HashSet<Point>; 4],
    score_px: [HashSet<Point>; 4],
    border_px: HashSet<Point>,
    middle_px: HashSet<Point>,
    ball_px: Point,
}

impl PongGame {
    pub fn new(seed: u64) -> Self {
        let state = PongState::new(seed);
        let ball_px = state.ball_point();
        Self {
            state,
            paddle_px: Default::default(),
            score_px: Default::default(),
            border_px: HashSet::new(),
            middle_px: middle_line_points(),
            ball_px,
        }
    }

    /// Initial full draw: center divider, both starting paddles, ball, and
    /// the bootstrap goals that initialize the P1/P2 score displays.
    pub fn start(&mut self, sink: &mut dyn RenderSink) {
        sink.clear();
        for &p in &self.middle_px {
            sink.set_pixel(p, palette::CORN_FIELD);
        }
        self.update_paddles(sink);
        sink.set_pixel(self.ball_px, palette::GREEN);
        let changed: Vec<usize> = self
            .state
            .goal(Some(0), None)
            .into_iter()
            .chain(self.state.goal(Some(1), None))
            .collect();
        self.redraw_scores(&changed, sink);
        sink.swap_on_vsync();
    }

    /// Color a vacated pixel falls back to, by layer priority.
    fn off_color(&self, p: Point) -> Color {
        if self.middle_px.contains(&p) {
            return palette::CORN_FIELD;
        }
        for idx in 0..4 {
            if self.paddle_px[idx].contains(&p) || self.score_px[idx].contains(&p) {
                return PADDLE_COLORS[idx];
            }
        }
        if self.border_px.contains(&p) {
            return palette::BLUE;
        }
        palette::OFF
    }

    fn update_paddles(&mut self, sink: &mut dyn RenderSink) {
        for idx in 0..4 {
            let new = if idx < self.state.active_players {
                let paddle = &self.state.paddles[idx];
                paddle_points(idx, paddle.pos, paddle.size())
            } else {
                HashSet::new()
            };
            for &p in self.paddle_px[idx].difference(&new) {
                let color = if self.border_px.contains(&p) {
                    palette::BLUE
                } else {
                    palette::OFF
                };
                sink.set_pixel(p, color);
            }
            for &p in new.difference(&self.paddle_px[idx]) {
                sink.set_pixel(p, PADDLE_COLORS[idx]);
            }
            self.paddle_px[idx] = new;
        }
    }

    fn redraw_scores(&mut self, players: &[usize], sink: &mut dyn RenderSink) {
        for &idx in players {
            let new = score_points(self.state.scores[idx], idx);
            for &p in self.score_px[idx].difference(&new) {
                sink.set_pixel(p, palette::OFF);
            }
            for &p in new.difference(&self.score_px[idx]) {
                sink.set_pixel(p, PADDLE_COLORS[idx]);
            }
            self.score_px[idx] = new;
        }
    }

    /// Switches one border from wall to paddle. Crossing the 3-player
    /// threshold also swaps the center divider for the full border.
    fn activate(&mut self, idx: usize, sink: &mut dyn RenderSink) {
        if self.state.active_players > idx {
            return;
        }
        if self.border_px.is_empty() {
            for &p in &self.middle_px {
                sink.set_pixel(p, palette::OFF);
            }
            self.middle_px.clear();
            self.border_px = border_points();
            for &p in &self.border_px {
                sink.set_pixel(p, palette::BLUE);
            }
            // Side paddles redraw in full on top of the new border.
            self.paddle_px[0].clear();
            self.paddle_px[1].clear();
        }
        let changed = self.state.activate_player(idx);
        self.redraw_scores(&changed, sink);
        info!(player = idx + 1, "paddle activated");
    }

    pub fn tick(&mut self, inputs: &TickInputs, sink: &mut dyn RenderSink) -> TickResult {
        // Diff drawing writes deltas on top of the previous frame.
        sink.create_back_buffer();

        if inputs.is_bound("P3") {
            self.activate(2, sink);
        }
        if inputs.is_bound("P4") {
            self.activate(3, sink);
        }

        let mut cmds = [None; 4];
        for (i, name) in PLAYER_NAMES.iter().enumerate() {
            cmds[i] = inputs.command(name);
        }
        self.state.apply_commands(cmds);
        self.update_paddles(sink);

        let changed = self.state.advance_ball();
        self.redraw_scores(&changed, sink);

        let new_ball = self.state.ball_point();
        if new_ball != self.ball_px {
            let off = self.off_color(self.ball_px);
            sink.set_pixel(self.ball_px, off);
            sink.set_pixel(new_ball, palette::GREEN);
            self.ball_px = new_ball;
        }

        sink.swap_on_vsync();
        TickResult::Continue
    }
}

pub struct PongProgram;

#[async_trait]
impl Program for PongProgram {
    fn name(&self) -> &'static str {
        "pong"
    }

    async fn run(self: Box<Self>, ctx: ProgramCtx) -> anyhow::Result<()> {
        let server = RendezvousServer::bind(&ctx.cfg.listen_addr).await?;
        info!(addr = %server.local_addr()?, "pong rendezvous listening");
        let mut session = server.register(MIN_PLAYERS, &PLAYER_NAMES);
        session.wait_for_quorum().await;
        info!(players = session.len(), "quorum met, starting pong");

        let mut sink = ctx.sink.lock().await;
        let mut game = PongGame::new(rand::random());
        game.start(sink.as_mut());

        let scheduler = FrameScheduler::new(Duration::from_micros(1_000_000 / FPS));
        let reason = scheduler
            .run(&mut session, |inputs| game.tick(inputs, sink.as_mut()))
            .await?;
        info!(%reason, "pong ended");
        Ok(())
    }
}
