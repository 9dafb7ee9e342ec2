//! Slither: multiplayer grid snakes.
//!
//! Up to six snakes share the board. Growth is deferred one tick behind
//! consumption: eating marks the head cell, and the tail pop is skipped the
//! tick that mark reaches the tail. Dead snakes decay into apples with
//! fixed probability, and the apple count is replenished to a target every
//! tick.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use matrix_shared::net::{Command, Direction};
use matrix_shared::render::{palette, Color, Point, RenderSink};

use crate::rendezvous::RendezvousServer;
use crate::scheduler::{FrameScheduler, TickInputs, TickResult};
use crate::supervisor::{Program, ProgramCtx};

pub const SNAKE_NAMES: [&str; 6] = ["P1", "P2", "P3", "P4", "P5", "P6"];
pub const MIN_PLAYERS: usize = 1;
pub const FPS: u64 = 20;

pub const BOARD_SIZE: i32 = 64;
const INITIAL_SNAKE_LEN: i32 = 4;
const SPAWN_SAFE_ZONE: i32 = 5;
const APPLES_TARGET: usize = 20;
const DEAD_TO_APPLE_RATE: f64 = 0.3;

const BORDER_TOP: i32 = 0;
const BORDER_BOTTOM: i32 = BOARD_SIZE - 1;
const BORDER_LEFT: i32 = 0;
const BORDER_RIGHT: i32 = BOARD_SIZE - 1;

fn snake_color(name: &str) -> Color {
    let idx = SNAKE_NAMES.iter().position(|n| *n == name).unwrap_or(0);
    palette::SNAKE_COLORS[idx % palette::SNAKE_COLORS.len()]
}

/// Simulation state. Snakes are ordered head-first; `eating` holds cells
/// whose growth is still pending.
pub struct SlitherState {
    /// BTreeMap for stable iteration order across ticks.
    pub snakes: BTreeMap<String, VecDeque<Point>>,
    pub dirs: BTreeMap<String, Direction>,
    pub apples: HashSet<Point>,
    pub eating: HashSet<Point>,
    rng: StdRng,
}

impl SlitherState {
    pub fn new(seed: u64) -> Self {
        Self {
            snakes: BTreeMap::new(),
            dirs: BTreeMap::new(),
            apples: HashSet::new(),
            eating: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Spawns a snake at a random unobstructed location (rejection-sampled).
    /// The sampled strip covers the body plus a safe zone ahead; apples
    /// under the strip are removed. The snake starts heading right.
    pub fn spawn_snake(&mut self, name: &str) -> Vec<Point> {
        let strip_len = INITIAL_SNAKE_LEN + SPAWN_SAFE_ZONE;
        let occupied: HashSet<Point> = self.snakes.values().flatten().copied().collect();

        let strip: Vec<Point> = loop {
            let x = self.rng.gen_range(BORDER_LEFT..BORDER_RIGHT - strip_len);
            let y = self.rng.gen_range(BORDER_TOP..BORDER_BOTTOM);
            let candidate: Vec<Point> = (0..strip_len).map(|i| (x + i, y)).collect();
            if candidate.iter().all(|p| !occupied.contains(p)) {
                break candidate;
            }
        };

        for p in &strip {
            self.apples.remove(p);
        }

        // Head-first: the rightmost body cells, largest x leading.
        let body: VecDeque<Point> = strip
            .iter()
            .rev()
            .take(INITIAL_SNAKE_LEN as usize)
            .copied()
            .collect();
        let cells: Vec<Point> = body.iter().copied().collect();
        self.snakes.insert(name.to_string(), body);
        self.dirs.insert(name.to_string(), Direction::Right);
        debug!(player = %name, "snake spawned");
        cells
    }

    /// Applies a direction change, rejecting 180° reversals.
    pub fn apply_direction(&mut self, name: &str, dir: Direction) {
        if let Some(current) = self.dirs.get_mut(name) {
            if dir != current.opposite() && dir != *current {
                *current = dir;
            }
        }
    }

    fn next_head(head: Point, dir: Direction) -> Option<Point> {
        let (x, y) = head;
        match dir {
            Direction::Up if y == BORDER_TOP => None,
            Direction::Up => Some((x, y - 1)),
            Direction::Down if y == BORDER_BOTTOM => None,
            Direction::Down => Some((x, y + 1)),
            Direction::Right if x == BORDER_RIGHT => None,
            Direction::Right => Some((x + 1, y)),
            Direction::Left if x == BORDER_LEFT => None,
            Direction::Left => Some((x - 1, y)),
        }
    }
}

/// Pixel-level changes of one simulation step, for diff drawing.
#[derive(Debug, Default)]
pub struct StepDiff {
    pub cleared: Vec<Point>,
    /// (cell, owner name) for newly occupied head cells.
    pub grown: Vec<(Point, String)>,
    /// Cells of dead snakes converted to apples.
    pub new_apples: Vec<Point>,
    pub dead: Vec<String>,
}

impl SlitherState {
    /// One simulation step: tail pops (unless eating), head moves, collision
    /// kills, dead snakes decay into apples.
    pub fn step(&mut self) -> StepDiff {
        let mut diff = StepDiff::default();

        // Pop tails first; a tail on an eating mark consumes the mark
        // instead (deferred growth).
        for snake in self.snakes.values_mut() {
            if let Some(&tail) = snake.back() {
                if self.eating.remove(&tail) {
                    continue;
                }
                snake.pop_back();
                diff.cleared.push(tail);
            }
        }

        // Compute new heads in stable name order.
        let names: Vec<String> = self.snakes.keys().cloned().collect();
        for name in &names {
            let (head, dir) = match (self.snakes.get(name), self.dirs.get(name)) {
                (Some(snake), Some(dir)) => match snake.front() {
                    Some(&head) => (head, *dir),
                    None => continue,
                },
                _ => continue,
            };

            let Some(new_head) = Self::next_head(head, dir) else {
                diff.dead.push(name.clone());
                continue;
            };

            if self.apples.remove(&new_head) {
                self.eating.insert(new_head);
            }

            let collides = self.snakes.values().any(|s| s.contains(&new_head));
            if collides {
                diff.dead.push(name.clone());
                continue;
            }

            if let Some(snake) = self.snakes.get_mut(name) {
                snake.push_front(new_head);
                diff.grown.push((new_head, name.clone()));
            }
        }

        // Dead snakes decay: each cell becomes an apple with fixed
        // probability, else clears.
        for name in &diff.dead {
            if let Some(snake) = self.snakes.remove(name) {
                for cell in snake {
                    if self.rng.gen::<f64>() < DEAD_TO_APPLE_RATE {
                        self.apples.insert(cell);
                        diff.new_apples.push(cell);
                    } else {
                        diff.cleared.push(cell);
                    }
                }
            }
            self.dirs.remove(name);
            info!(player = %name, "snake died");
        }

        diff
    }

    /// Replenishes the apple set to the fixed target via rejection-sampled
    /// random placement. Returns the new apples.
    pub fn replenish_apples(&mut self) -> Vec<Point> {
        let mut spawned = Vec::new();
        while self.apples.len() < APPLES_TARGET {
            let p = (
                self.rng.gen_range(0..BOARD_SIZE),
                self.rng.gen_range(0..BOARD_SIZE),
            );
            let blocked =
                self.apples.contains(&p) || self.snakes.values().any(|s| s.contains(&p));
            if blocked {
                continue;
            }
            self.apples.insert(p);
            spawned.push(p);
        }
        spawned
    }

    fn random_apple_color(&mut self) -> Color {
        let colors = palette::SNAKE_COLORS;
        colors[self.rng.gen_range(0..colors.len())]
    }
}

/// Simulation plus drawing.
pub struct SlitherGame {
    pub state: SlitherState,
}

impl SlitherGame {
    pub fn new(seed: u64) -> Self {
        Self {
            state: SlitherState::new(seed),
        }
    }

    pub fn start(&mut self, sink: &mut dyn RenderSink) {
        sink.clear();
        sink.swap_on_vsync();
    }

    pub fn tick(&mut self, inputs: &TickInputs, sink: &mut dyn RenderSink) -> TickResult {
        // Diff drawing writes deltas on top of the previous frame.
        sink.create_back_buffer();

        // First input from an unseen bound player spawns its snake.
        for name in inputs.bound() {
            if inputs.received_from(name) && !self.state.snakes.contains_key(name) {
                let color = snake_color(name);
                for p in self.state.spawn_snake(name) {
                    sink.set_pixel(p, color);
                }
            }
            if let Some(Command::Move(dir)) = inputs.command(name) {
                self.state.apply_direction(name, dir);
            }
        }

        let diff = self.state.step();
        for p in diff.cleared {
            sink.set_pixel(p, palette::OFF);
        }
        for (p, name) in diff.grown {
            sink.set_pixel(p, snake_color(&name));
        }
        for p in diff.new_apples {
            let color = self.state.random_apple_color();
            sink.set_pixel(p, color);
        }
        for p in self.state.replenish_apples() {
            let color = self.state.random_apple_color();
            sink.set_pixel(p, color);
        }

        sink.swap_on_vsync();
        TickResult::Continue
    }
}

pub struct SlitherProgram;

#[async_trait]
impl Program for SlitherProgram {
    fn name(&self) -> &'static str {
        "slither"
    }

    async fn run(self: Box<Self>, ctx: ProgramCtx) -> anyhow::Result<()> {
        let server = RendezvousServer::bind(&ctx.cfg.listen_addr).await?;
        info!(addr = %server.local_addr()?, "slither rendezvous listening");
        let mut session = server.register(MIN_PLAYERS, &SNAKE_NAMES);
        session.wait_for_quorum().await;
        info!(players = session.len(), "quorum met, starting slither");

        let mut sink = ctx.sink.lock().await;
        let mut game = SlitherGame::new(rand::random());
        game.start(sink.as_mut());

        let scheduler = FrameScheduler::new(Duration::from_micros(1_000_000 / FPS));
        let reason = scheduler
            .run(&mut session, |inputs| game.tick(inputs, sink.as_mut()))
            .await?;
        info!(%reason, "slither ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_snakes_never_intersect_existing_ones() {
        let mut state = SlitherState::new(42);
        for (i, name) in SNAKE_NAMES.iter().cycle().take(1_000).enumerate() {
            let key = format!("{name}-{i}");
            let cells = state.spawn_snake(&key);
            let occupied: usize = state.snakes.values().map(|s| s.len()).sum();
            let distinct: HashSet<Point> = state.snakes.values().flatten().copied().collect();
            assert_eq!(occupied, distinct.len(), "spawn {key} overlapped a snake");
            assert_eq!(cells.len(), INITIAL_SNAKE_LEN as usize);
            // Keep the board from filling up: clear periodically.
            if state.snakes.len() >= 50 {
                state.snakes.clear();
                state.dirs.clear();
            }
        }
    }

    #[test]
    fn snake_body_never_self_overlaps_while_moving() {
        let mut state = SlitherState::new(7);
        state.spawn_snake("P1");
        for dir in [
            Direction::Down,
            Direction::Left,
            Direction::Up,
            Direction::Right,
            Direction::Down,
        ] {
            state.apply_direction("P1", dir);
            state.step();
            if let Some(snake) = state.snakes.get("P1") {
                let distinct: HashSet<&Point> = snake.iter().collect();
                assert_eq!(distinct.len(), snake.len());
            }
        }
    }

    #[test]
    fn reversal_is_rejected() {
        let mut state = SlitherState::new(1);
        state.spawn_snake("P1");
        assert_eq!(state.dirs["P1"], Direction::Right);
        state.apply_direction("P1", Direction::Left);
        assert_eq!(state.dirs["P1"], Direction::Right);
        state.apply_direction("P1", Direction::Up);
        assert_eq!(state.dirs["P1"], Direction::Up);
        state.apply_direction("P1", Direction::Down);
        assert_eq!(state.dirs["P1"], Direction::Up);
    }

    #[test]
    fn eating_grows_one_tick_later() {
        let mut state = SlitherState::new(3);
        // Fixed layout, far from every wall.
        state.snakes.insert(
            "P1".to_string(),
            VecDeque::from([(10, 10), (9, 10), (8, 10), (7, 10)]),
        );
        state.dirs.insert("P1".to_string(), Direction::Right);
        let head = *state.snakes["P1"].front().unwrap();
        let len = state.snakes["P1"].len();
        // Plant an apple straight ahead.
        state.apples.insert((head.0 + 1, head.1));

        state.step();
        // Head advanced onto the apple; tail popped as usual.
        assert_eq!(state.snakes["P1"].len(), len);
        assert!(state.eating.contains(&(head.0 + 1, head.1)));

        // Growth lands when the mark reaches the tail.
        for _ in 0..len {
            state.step();
        }
        assert_eq!(state.snakes["P1"].len(), len + 1);
        assert!(state.eating.is_empty());
    }

    #[test]
    fn wall_collision_kills_and_decays_into_apples() {
        let mut state = SlitherState::new(11);
        state.spawn_snake("P1");
        // Drive the snake into the right wall.
        let mut dead = Vec::new();
        for _ in 0..BOARD_SIZE {
            let diff = state.step();
            if !diff.dead.is_empty() {
                dead = diff.dead;
                break;
            }
        }
        assert_eq!(dead, vec!["P1".to_string()]);
        assert!(state.snakes.is_empty());
        assert!(state.dirs.is_empty());
    }

    #[test]
    fn apples_replenish_to_target() {
        let mut state = SlitherState::new(5);
        state.replenish_apples();
        assert_eq!(state.apples.len(), APPLES_TARGET);
        // Eat two, replenish back.
        let two: Vec<Point> = state.apples.iter().take(2).copied().collect();
        for p in two {
            state.apples.remove(&p);
        }
        state.replenish_apples();
        assert_eq!(state.apples.len(), APPLES_TARGET);
    }
}
