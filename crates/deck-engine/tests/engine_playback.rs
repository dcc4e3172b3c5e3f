#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{process_alive, script, wait_for_starts, Fixture, Running};
use deck_engine::BroadcastMessage;
use deck_proto::protocol::{Command, ErrorClass, PlaybackStatus};

fn current_name(snapshot: &deck_proto::protocol::EngineSnapshot) -> Option<String> {
    snapshot.current.as_ref().map(|e| e.display_name.clone())
}

#[tokio::test]
async fn next_walks_the_view_and_wraps() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::SelectSoundfont {
            path: fixture.path_string("fonts/GM.sf2"),
        })
        .await;
    let snapshot = engine.command(Command::Play { path: None }).await;
    assert_eq!(current_name(&snapshot).as_deref(), Some("a.mid"));
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    wait_for_starts(&fixture, 1).await;

    let snapshot = engine.command(Command::Next).await;
    assert_eq!(current_name(&snapshot).as_deref(), Some("b.mod"));
    wait_for_starts(&fixture, 2).await;
    let snapshot = engine.command(Command::Next).await;
    assert_eq!(current_name(&snapshot).as_deref(), Some("a.mid"));

    let starts = wait_for_starts(&fixture, 3).await;
    let targets: Vec<_> = starts.iter().map(|s| s.target.as_str()).collect();
    assert!(targets[0].ends_with("a.mid"));
    assert!(targets[1].ends_with("b.mod"));
    assert!(targets[2].ends_with("a.mid"));
    // Every superseded job is gone before the next one starts.
    assert!(!process_alive(starts[0].pid));
    assert!(!process_alive(starts[1].pid));
    assert!(process_alive(starts[2].pid));

    engine.shutdown().await;
    assert!(!process_alive(starts[2].pid));
}

#[tokio::test]
async fn midi_without_soundfont_spawns_nothing() {
    let fixture = Fixture::new("exec sleep 30");
    let mut engine = Running::start(fixture.config.clone()).await;

    engine.send(Command::Play { path: None });
    let error = engine
        .next_broadcast(|m| matches!(m, BroadcastMessage::Error { .. }))
        .await;
    assert_eq!(
        error,
        BroadcastMessage::Error {
            class: ErrorClass::Configuration,
            message: "No SoundFont selected".to_string(),
        }
    );

    let snapshot = engine
        .wait_for("status message", |s| s.status_message.is_some())
        .await;
    assert_eq!(snapshot.status, PlaybackStatus::Idle);
    assert_eq!(snapshot.status_message.as_deref(), Some("No SoundFont selected"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fixture.starts().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn finished_track_advances_to_next() {
    let fixture = Fixture::new("sleep 0.2");
    let engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::SelectSoundfont {
            path: fixture.path_string("fonts/GM.sf2"),
        })
        .await;
    engine
        .command(Command::Play {
            path: Some(fixture.path_string("media/b.mod")),
        })
        .await;

    // b.mod ends, wraps to a.mid.
    let starts = wait_for_starts(&fixture, 2).await;
    assert!(starts[0].target.ends_with("b.mod"));
    assert!(starts[1].target.ends_with("a.mid"));

    engine.command(Command::Stop).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn failing_track_does_not_advance() {
    let fixture = Fixture::new("echo 'error: bad module' >&2\nexit 1");
    let mut engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::Play {
            path: Some(fixture.path_string("media/b.mod")),
        })
        .await;
    let error = engine
        .next_broadcast(|m| matches!(m, BroadcastMessage::Error { .. }))
        .await;
    match error {
        BroadcastMessage::Error { class, message } => {
            assert_eq!(class, ErrorClass::Runtime);
            assert!(message.contains("error: bad module"));
        }
        other => panic!("unexpected {:?}", other),
    }

    let snapshot = engine
        .wait_for("error status", |s| s.status == PlaybackStatus::Error)
        .await;
    assert_eq!(current_name(&snapshot).as_deref(), Some("b.mod"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fixture.starts().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn finished_job_resets_progress_to_zero() {
    let fixture = Fixture::new("echo 'error: bad module' >&2\nexit 1");
    let mut engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::Play {
            path: Some(fixture.path_string("media/b.mod")),
        })
        .await;
    let reset = engine
        .next_broadcast(|m| {
            matches!(m, BroadcastMessage::Progress { elapsed_secs, .. } if *elapsed_secs == 0.0)
        })
        .await;
    assert_eq!(
        reset,
        BroadcastMessage::Progress {
            elapsed_secs: 0.0,
            total_secs: None,
        }
    );

    let snapshot = engine
        .wait_for("error status", |s| s.status == PlaybackStatus::Error)
        .await;
    assert_eq!(snapshot.elapsed_secs, None);

    engine.shutdown().await;
}

#[tokio::test]
async fn set_volume_runs_the_mixer_and_lands_in_the_snapshot() {
    let mut fixture = Fixture::new("exec sleep 30");
    let calls = fixture.path("mixer.log");
    fixture.config.backends.mixer.program = script(
        fixture.dir.path(),
        "mixer.sh",
        &format!(
            "echo \"$*\" >> '{}'\n[ \"$1\" = get-volume ] && echo 'Volume: 0.45'\nexit 0",
            calls.display()
        ),
    );
    let engine = Running::start(fixture.config.clone()).await;

    let snapshot = engine.wait_for("initial volume", |s| s.volume.is_some()).await;
    assert_eq!(snapshot.volume, Some(45));

    engine.send(Command::SetVolume { percent: 70 });
    engine.wait_for("volume 70", |s| s.volume == Some(70)).await;
    let log = std::fs::read_to_string(&calls).unwrap();
    assert!(log.lines().any(|l| l == "set-volume @DEFAULT_AUDIO_SINK@ 70%"));

    engine.shutdown().await;
}

#[tokio::test]
async fn mixer_failure_is_not_surfaced() {
    let mut fixture = Fixture::new("exec sleep 30");
    fixture.config.backends.mixer.program =
        script(fixture.dir.path(), "mixer.sh", "echo 'no sink' >&2\nexit 1");
    let mut engine = Running::start(fixture.config.clone()).await;

    engine.send(Command::SetVolume { percent: 30 });
    engine.command(Command::Stop).await;
    let surfaced = tokio::time::timeout(
        Duration::from_millis(500),
        engine.next_broadcast(|m| matches!(m, BroadcastMessage::Error { .. })),
    )
    .await;
    assert!(surfaced.is_err(), "mixer failure reached presentation layers");
    assert_eq!(engine.handle.snapshot().await.volume, None);

    engine.shutdown().await;
}

#[tokio::test]
async fn stop_then_play_same_track_restarts_it() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;
    let song = fixture.path_string("media/b.mod");

    engine.command(Command::Play { path: Some(song.clone()) }).await;
    wait_for_starts(&fixture, 1).await;
    engine.command(Command::Play { path: Some(song) }).await;

    let starts = wait_for_starts(&fixture, 2).await;
    assert_eq!(starts.len(), 2);
    assert!(!process_alive(starts[0].pid));
    assert!(process_alive(starts[1].pid));

    let snapshot = engine.command(Command::Stop).await;
    assert_eq!(snapshot.status, PlaybackStatus::Idle);
    assert_eq!(snapshot.status_message.as_deref(), Some("Stopped"));
    assert!(!process_alive(starts[1].pid));

    // Nothing is restarted by the stopped job's exit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fixture.starts().len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn favourites_sentinel_filters_view() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;

    let snapshot = engine.command(Command::GetState).await;
    assert_eq!(snapshot.view_len, 2);

    engine
        .command(Command::ToggleFavourite {
            path: fixture.path_string("media/b.mod"),
        })
        .await;
    let snapshot = engine
        .command(Command::SetFilter {
            text: "*".to_string(),
        })
        .await;
    assert_eq!(snapshot.view_len, 1);
    assert_eq!(snapshot.filter, "*");
    let current = snapshot.current.unwrap();
    assert_eq!(current.display_name, "b.mod");
    assert!(current.is_favourite);

    let saved = std::fs::read_to_string(fixture.path("favourites.txt")).unwrap();
    assert_eq!(saved.trim(), fixture.path_string("media/b.mod"));

    // Second toggle empties the filtered view and the file.
    let snapshot = engine
        .command(Command::ToggleFavourite {
            path: fixture.path_string("media/b.mod"),
        })
        .await;
    assert_eq!(snapshot.view_len, 0);
    assert!(snapshot.current.is_none());
    let saved = std::fs::read_to_string(fixture.path("favourites.txt")).unwrap();
    assert!(saved.trim().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn shuffle_toggle_stops_and_resets_cursor() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::Play {
            path: Some(fixture.path_string("media/b.mod")),
        })
        .await;
    let starts = wait_for_starts(&fixture, 1).await;

    let snapshot = engine.command(Command::ToggleShuffle).await;
    assert!(snapshot.shuffle);
    assert_eq!(snapshot.cursor, Some(0));
    assert_eq!(snapshot.status, PlaybackStatus::Idle);
    assert!(!process_alive(starts[0].pid));

    let snapshot = engine.command(Command::ToggleShuffle).await;
    assert!(!snapshot.shuffle);
    assert_eq!(current_name(&snapshot).as_deref(), Some("a.mid"));
    engine.shutdown().await;
}

#[tokio::test]
async fn pause_freezes_and_resume_continues() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::Play {
            path: Some(fixture.path_string("media/b.mod")),
        })
        .await;
    let snapshot = engine.command(Command::TogglePause).await;
    assert_eq!(snapshot.status, PlaybackStatus::Paused);
    let snapshot = engine.command(Command::TogglePause).await;
    assert_eq!(snapshot.status, PlaybackStatus::Playing);

    engine.shutdown().await;
}

#[tokio::test]
async fn empty_view_reports_no_file_selected() {
    let fixture = Fixture::new("exec sleep 30");
    let mut engine = Running::start(fixture.config.clone()).await;

    engine
        .command(Command::SetFilter {
            text: "no such track".to_string(),
        })
        .await;
    engine.send(Command::Next);
    let error = engine
        .next_broadcast(|m| matches!(m, BroadcastMessage::Error { .. }))
        .await;
    assert_eq!(
        error,
        BroadcastMessage::Error {
            class: ErrorClass::Configuration,
            message: "No file selected".to_string(),
        }
    );
    assert!(fixture.starts().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn media_dir_change_rescans_and_resets_cursor() {
    let fixture = Fixture::new("exec sleep 30");
    let engine = Running::start(fixture.config.clone()).await;

    let other = fixture.path("other");
    std::fs::create_dir_all(other.join("deep")).unwrap();
    std::fs::write(other.join("deep/z.xm"), b"x").unwrap();
    std::fs::write(other.join("c.it"), b"x").unwrap();
    std::fs::write(other.join("notes.txt"), b"x").unwrap();

    engine
        .command(Command::Select {
            path: fixture.path_string("media/b.mod"),
        })
        .await;
    let snapshot = engine
        .command(Command::SetMediaDir {
            path: other.to_string_lossy().into_owned(),
        })
        .await;
    assert_eq!(snapshot.view_len, 2);
    assert_eq!(snapshot.cursor, Some(0));
    assert_eq!(current_name(&snapshot).as_deref(), Some("c.it"));
    engine.shutdown().await;
}
