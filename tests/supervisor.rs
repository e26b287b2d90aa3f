mod common;

use std::time::Duration;

use jukebot::{
    session::Status,
    supervisor::{SweepReport, Supervisor},
    voice::ChannelId,
};

use common::{wait, Harness, User};

const ONE: ChannelId = ChannelId(1);
const TWO: ChannelId = ChannelId(2);

/// Plays one song in `channel` and lets it end.
async fn play_out(h: &Harness, channel: u64) {
    h.player
        .play(&User::in_channel(channel), "a")
        .await
        .unwrap();
    h.loopback.finish(ChannelId(channel));
    wait(1100).await;
}

#[tokio::test(start_paused = true)]
async fn releases_idle_channels() {
    let h = Harness::new();
    play_out(&h, 1).await;
    h.player.play(&User::in_channel(2), "b").await.unwrap();
    assert_eq!(h.player.status(ONE).await, Some(Status::Idle));

    // Just gone idle.
    let supervisor = Supervisor::new(h.player.clone());
    assert_eq!(supervisor.sweep().await, SweepReport::default());
    assert_eq!(h.player.status(ONE).await, Some(Status::Idle));

    // Idle for a whole sweep interval.
    wait(300_000).await;
    let report = supervisor.sweep().await;
    assert_eq!(report.queues, 1);
    assert_eq!(report.sessions, 0);

    assert_eq!(h.player.status(ONE).await, None);
    assert!(!h.loopback.is_connected(ONE));
    assert_eq!(h.player.status(TWO).await, Some(Status::Playing));
}

#[tokio::test(start_paused = true)]
async fn reclaim_predicate_decides() {
    let h = Harness::new();
    play_out(&h, 1).await;

    let supervisor = Supervisor::new(h.player.clone())
        .with_reclaim(|idle| idle.connected && idle.idle_for >= Duration::from_secs(600));
    assert_eq!(supervisor.sweep().await, SweepReport::default());
    assert_eq!(h.player.status(ONE).await, Some(Status::Idle));

    wait(600_000).await;
    assert_eq!(supervisor.sweep().await.queues, 1);
    assert_eq!(h.player.status(ONE).await, None);
}

#[tokio::test(start_paused = true)]
async fn tears_down_silently_dead_connections() {
    let h = Harness::new();
    h.player.play(&User::in_channel(1), "a").await.unwrap();
    h.player.play(&User::in_channel(2), "b").await.unwrap();
    h.loopback.kill_silently(TWO);

    let report = Supervisor::new(h.player.clone())
        .with_reclaim(|_| false)
        .sweep()
        .await;
    assert_eq!(report.sessions, 1);
    assert_eq!(report.queues, 0);

    assert_eq!(h.player.status(ONE).await, Some(Status::Playing));
    assert_eq!(h.player.status(TWO).await, None);
}

#[tokio::test(start_paused = true)]
async fn purges_expired_cache_entries() {
    let h = Harness::new();
    let user = User::in_channel(1);
    h.player.play(&user, "a").await.unwrap();
    h.player.stop(&user).await.unwrap();

    let supervisor = Supervisor::new(h.player.clone());
    assert_eq!(supervisor.sweep().await.expired, 0);

    // Search results live for 15 minutes, streams for 30.
    wait(16 * 60 * 1000).await;
    assert_eq!(supervisor.sweep().await.expired, 1);
    assert_eq!(h.player.resolver().caches().streams.len(), 1);

    // Idempotent.
    assert_eq!(supervisor.sweep().await.expired, 0);
}

#[tokio::test(start_paused = true)]
async fn runs_periodically() {
    let h = Harness::new();
    play_out(&h, 1).await;

    let supervisor = Supervisor::new(h.player.clone()).with_interval(Duration::from_secs(60));
    let task = tokio::spawn(supervisor.run());

    wait(30_000).await;
    assert_eq!(h.player.status(ONE).await, Some(Status::Idle));

    wait(31_000).await;
    assert_eq!(h.player.status(ONE).await, None);
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn release_while_resolving_keeps_the_request() {
    let h = Harness::new();
    play_out(&h, 1).await;
    h.youtube.delay_searches(Duration::from_secs(2));

    let player = h.player.clone();
    let play = tokio::spawn(async move { player.play(&User::in_channel(1), "slow").await });
    wait(500).await;

    let report = Supervisor::new(h.player.clone())
        .with_reclaim(|_| true)
        .sweep()
        .await;
    assert_eq!(report.queues, 1);
    assert!(!h.loopback.is_connected(ONE));

    let reply = play.await.unwrap().unwrap();
    assert_eq!(reply.title, "Now playing");
    assert_eq!(h.player.status(ONE).await, Some(Status::Playing));
    assert_eq!(h.played(1), ["a", "slow"]);
    assert_eq!(h.loopback.connects(ONE), 2);
}

#[tokio::test(start_paused = true)]
async fn sweep_waits_for_acquisition_in_flight() {
    let h = Harness::new();
    h.youtube.delay_streams(Duration::from_secs(2));
    let supervisor = Supervisor::new(h.player.clone()).with_reclaim(|_| true);

    let player = h.player.clone();
    let play = tokio::spawn(async move { player.play(&User::in_channel(1), "a").await });
    wait(500).await;

    // Blocks until the acquisition is done, and then finds a busy channel.
    assert_eq!(supervisor.sweep().await, SweepReport::default());
    assert_eq!(play.await.unwrap().unwrap().title, "Now playing");
    assert_eq!(h.player.status(ONE).await, Some(Status::Playing));
    assert_eq!(h.played(1), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn sweep_and_stop_release_once() {
    let h = Harness::new();
    play_out(&h, 1).await;
    let user = User::in_channel(1);
    let supervisor = Supervisor::new(h.player.clone()).with_reclaim(|_| true);

    let (report, stopped) = tokio::join!(supervisor.sweep(), h.player.stop(&user));
    let released = report.queues + usize::from(stopped.is_ok());
    assert_eq!(released, 1);
    assert_eq!(h.player.status(ONE).await, None);
    assert!(!h.loopback.is_connected(ONE));
}
