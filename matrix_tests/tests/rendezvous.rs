//! Socket-level tests for the name handshake and quorum.

use std::time::Duration;

use matrix_shared::net::{TOKEN_READY, TOKEN_TAKEN, TOKEN_WAIT};
use matrix_tests::{bind_ephemeral, init_test_logging, RawPlayer, STEP_TIMEOUT};

async fn wait_until_started(session: &mut matrix_server::rendezvous::Session) {
    tokio::time::timeout(STEP_TIMEOUT, session.wait_for_quorum())
        .await
        .expect("quorum never latched");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quorum_latches_once_min_clients_bind() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(2, &["P1", "P2", "P3", "P4"]);

    let mut p1 = RawPlayer::open(&addr).await?;
    p1.send_name("P1").await?;
    assert_eq!(p1.next_token().await?, TOKEN_WAIT);
    assert!(!session.can_start(), "one player is below quorum");

    let mut p2 = RawPlayer::open(&addr).await?;
    p2.send_name("P2").await?;
    assert_eq!(p2.next_token().await?, TOKEN_READY);

    wait_until_started(&mut session).await;
    assert!(session.can_start());

    // Both players land in the session map via the join channel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.poll_joins(0);
    assert_eq!(session.names(), vec!["P1".to_string(), "P2".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_names_retry_on_the_same_connection() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(2, &["P1", "P2"]);

    let mut p1 = RawPlayer::open(&addr).await?;
    p1.send_name("P1").await?;
    assert_eq!(p1.next_token().await?, TOKEN_WAIT);

    // Unknown name, then a duplicate: both rejected, neither counts.
    let mut p2 = RawPlayer::open(&addr).await?;
    p2.send_name("NOPE").await?;
    assert_eq!(p2.next_token().await?, TOKEN_TAKEN);
    p2.send_name("P1").await?;
    assert_eq!(p2.next_token().await?, TOKEN_TAKEN);
    assert!(!session.can_start(), "rejects must not count toward quorum");

    // Same connection, unused name: binds and completes quorum.
    p2.send_name("P2").await?;
    assert_eq!(p2.next_token().await?, TOKEN_READY);
    wait_until_started(&mut session).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_allowed_name_binds_without_a_name_line() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(1, &["P1"]);

    // The client sends nothing; the host assigns the only name.
    let mut p1 = RawPlayer::open(&addr).await?;
    assert_eq!(p1.next_token().await?, TOKEN_READY);

    wait_until_started(&mut session).await;
    assert_eq!(session.names(), vec!["P1".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quorum_wait_wakes_as_players_bind() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(2, &["P1", "P2"]);

    // Start waiting before anyone connects; each bind must wake the
    // waiter, no polling involved.
    let connector = tokio::spawn(async move {
        for name in ["P1", "P2"] {
            let mut p = RawPlayer::open(&addr).await?;
            p.send_name(name).await?;
            p.next_token().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    wait_until_started(&mut session).await;
    assert!(session.can_start());
    connector.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latecomers_bind_after_the_game_started() -> anyhow::Result<()> {
    init_test_logging();
    let (server, addr) = bind_ephemeral().await?;
    let mut session = server.register(1, &["P1", "P2"]);

    let mut p1 = RawPlayer::open(&addr).await?;
    p1.send_name("P1").await?;
    assert_eq!(p1.next_token().await?, TOKEN_READY);
    wait_until_started(&mut session).await;

    // Quorum already met: the latecomer is told the game is running.
    let mut p2 = RawPlayer::open(&addr).await?;
    p2.send_name("P2").await?;
    assert_eq!(p2.next_token().await?, TOKEN_READY);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let joined = session.poll_joins(40);
    assert!(joined.contains(&"P2".to_string()));
    assert_eq!(session.len(), 2);
    Ok(())
}
