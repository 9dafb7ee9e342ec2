//! End-to-end pong session: real sockets, the frame scheduler, and a
//! pixel-grid surface.

use std::time::Duration;

use matrix_server::games::pong::{PongGame, BORDER_MIN, PLAYER_NAMES};
use matrix_server::scheduler::{FrameScheduler, TickResult};
use matrix_shared::render::{palette, PixelGrid};
use matrix_tests::{bind_ephemeral, init_test_logging, RawPlayer, STEP_TIMEOUT};

const ARROW_UP: &[u8] = &[0x1b, b'[', b'A'];

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn third_player_joins_a_running_game() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(2, &PLAYER_NAMES);

    let mut p1 = RawPlayer::open(&addr).await?;
    p1.send_name("P1").await?;
    p1.next_token().await?;
    let mut p2 = RawPlayer::open(&addr).await?;
    p2.send_name("P2").await?;
    p2.next_token().await?;

    tokio::time::timeout(STEP_TIMEOUT, session.wait_for_quorum())
        .await
        .expect("quorum never latched");

    let mut grid = PixelGrid::new(64);
    let mut game = PongGame::new(12345);
    game.start(&mut grid);

    // Two-player layout: center divider lit, no border yet.
    assert_eq!(grid.get((32, 5)), palette::CORN_FIELD);
    assert_eq!(grid.get((BORDER_MIN - 1, 30)), palette::OFF);
    let p1_start = game.state.paddles[0].pos;

    // P3 joins and P1 steers while the tick loop runs.
    let addr_late = addr.clone();
    let late_join = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut p3 = RawPlayer::open(&addr_late).await?;
        p3.send_name("P3").await?;
        p3.next_token().await?;
        // Keep the connection alive past the join hand-off.
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<_, anyhow::Error>(p3)
    });
    let steer = tokio::spawn(async move {
        for _ in 0..60 {
            p1.send_bytes(ARROW_UP).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<_, anyhow::Error>(p1)
    });

    let scheduler = FrameScheduler::new(Duration::from_millis(25));
    let mut ticks = 0u32;
    let reason = scheduler
        .run(&mut session, |inputs| {
            let result = game.tick(inputs, &mut grid);
            assert_eq!(result, TickResult::Continue);
            ticks += 1;
            if ticks >= 40 {
                TickResult::Terminal("test window elapsed".to_string())
            } else {
                TickResult::Continue
            }
        })
        .await?;
    assert_eq!(reason, "test window elapsed");

    // The mid-game join activated the third paddle with its bootstrap
    // score, swapped the divider for the full border, and drew the top
    // paddle along y = 1..2.
    assert_eq!(game.state.active_players, 3);
    assert_eq!(game.state.scores[2], 1);
    assert_eq!(grid.get((BORDER_MIN - 1, 30)), palette::BLUE);
    assert_eq!(grid.get((32, 5)), palette::OFF);
    let top_paddle_lit = grid.lit().iter().any(|&(_, y)| y == 1);
    assert!(top_paddle_lit, "top paddle must be drawn after activation");

    // Steering input actually reached the simulation.
    assert_ne!(game.state.paddles[0].pos, p1_start);

    drop(session);
    let _ = late_join.await?;
    let _ = steer.await?;
    Ok(())
}
