//! Tick-loop behavior across connection failures: a vanished player must
//! never stall the loop or eat the survivors' input.

use std::time::Duration;

use matrix_server::scheduler::{FrameScheduler, TickResult};
use matrix_shared::net::{Command, Direction};
use matrix_tests::{bind_ephemeral, init_test_logging, RawPlayer, STEP_TIMEOUT};

const ARROW_DOWN: &[u8] = &[0x1b, b'[', b'B'];

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_mid_run_is_treated_as_silence() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(2, &["P1", "P2"]);

    let mut p1 = RawPlayer::open(&addr).await?;
    p1.send_name("P1").await?;
    p1.next_token().await?;
    let mut p2 = RawPlayer::open(&addr).await?;
    p2.send_name("P2").await?;
    p2.next_token().await?;
    tokio::time::timeout(STEP_TIMEOUT, session.wait_for_quorum())
        .await
        .expect("quorum never latched");
    // Let both join hand-offs land before the loop starts.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.poll_joins(0);
    assert_eq!(session.names(), vec!["P1".to_string(), "P2".to_string()]);

    // P1 hangs up; every read on its slot from here on is EOF.
    drop(p1);

    let steer = tokio::spawn(async move {
        for _ in 0..60 {
            if p2.send_bytes(ARROW_DOWN).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let scheduler = FrameScheduler::new(Duration::from_millis(20));
    let mut survivor_moves = 0u32;
    let mut ghost_reads = 0u32;
    let mut ticks = 0u32;
    let reason = scheduler
        .run(&mut session, |inputs| {
            // The dead player stays bound; EOF yields no received entry.
            assert!(inputs.is_bound("P1"));
            if inputs.received_from("P1") {
                ghost_reads += 1;
            }
            if inputs.command("P2") == Some(Command::Move(Direction::Down)) {
                survivor_moves += 1;
            }
            ticks += 1;
            if ticks >= 30 {
                TickResult::Terminal("window elapsed".to_string())
            } else {
                TickResult::Continue
            }
        })
        .await?;
    assert_eq!(reason, "window elapsed");
    assert_eq!(ticks, 30, "the loop must keep ticking past the disconnect");
    assert_eq!(ghost_reads, 0, "EOF must read as silence, not input");
    assert!(survivor_moves > 0, "the survivor's input must still land");

    drop(session);
    steer.await?;
    Ok(())
}
