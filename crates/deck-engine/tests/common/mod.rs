#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use deck_engine::{event_channel, BroadcastMessage, Engine, EngineHandle};
use deck_proto::config::Config;
use deck_proto::protocol::{Command, EngineSnapshot};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Write an executable `/bin/sh` script and return its path.
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Backend body that records `<pid> <args>` to `log` and then runs `rest`.
pub fn logging_backend(log: &Path, rest: &str) -> String {
    format!("echo \"$$ $*\" >> '{}'\n{}", log.display(), rest)
}

/// One line of a starts log.
#[derive(Debug, Clone)]
pub struct Start {
    pub pid: i32,
    pub target: String,
}

pub fn read_starts(log: &Path) -> Vec<Start> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let pid = words.next()?.parse().ok()?;
            let target = words.last()?.to_string();
            Some(Start { pid, target })
        })
        .collect()
}

pub fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub starts: PathBuf,
}

impl Fixture {
    /// Media dir with `a.mid` and `b.mod`, one soundfont, and every
    /// backend pointed at `backend_body`.
    pub fn new(backend_body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("media")).unwrap();
        std::fs::create_dir_all(root.join("fonts")).unwrap();
        std::fs::write(root.join("media/a.mid"), b"MThd").unwrap();
        std::fs::write(root.join("media/b.mod"), b"M.K.").unwrap();
        std::fs::write(root.join("fonts/GM.sf2"), b"RIFF").unwrap();

        let starts = root.join("starts.log");
        let backend = script(root, "backend.sh", &logging_backend(&starts, backend_body));

        let mut config = Config::default();
        config.paths.media_dir = root.join("media");
        config.paths.soundfont_dir = root.join("fonts");
        config.paths.favourites_file = root.join("favourites.txt");
        config.paths.output_dir = root.join("Output");
        config.backends.synth.program = backend.clone();
        config.backends.module_player.program = backend.clone();
        config.backends.stream.program = backend.clone();
        config.playback.stop_grace_ms = 500;
        config.playback.tick_interval_ms = 50;
        config.playback.stream_read_timeout_secs = 5;
        config.control.enabled = false;

        Self {
            dir,
            config,
            starts,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn path_string(&self, relative: &str) -> String {
        self.path(relative).to_string_lossy().into_owned()
    }

    pub fn starts(&self) -> Vec<Start> {
        read_starts(&self.starts)
    }
}

pub struct Running {
    pub handle: EngineHandle,
    pub broadcasts: broadcast::Receiver<BroadcastMessage>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    /// Spawn the engine loop and wait for its first snapshot.
    pub async fn start(config: Config) -> Self {
        let (events_tx, events_rx) = event_channel();
        let (broadcast_tx, broadcasts) = broadcast::channel(1024);
        let engine = Engine::new(config, events_tx, broadcast_tx);
        let handle = engine.handle();
        let task = tokio::spawn(engine.run(events_rx));
        let running = Self {
            handle,
            broadcasts,
            task,
        };
        running.wait_for("first snapshot", |s| s.rev >= 1).await;
        running
    }

    pub fn send(&self, command: Command) {
        self.handle.send(command).unwrap();
    }

    /// Poll the snapshot until `pred` holds.
    pub async fn wait_for<F>(&self, what: &str, pred: F) -> EngineSnapshot
    where
        F: Fn(&EngineSnapshot) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = self.handle.snapshot().await;
            if pred(&snapshot) {
                return snapshot;
            }
            if Instant::now() > deadline {
                panic!("timed out waiting for {}: {:?}", what, snapshot);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send `command` and wait until the engine has published after it.
    pub async fn command(&self, command: Command) -> EngineSnapshot {
        let before = self.handle.snapshot().await.rev;
        self.send(command);
        self.wait_for("command to be applied", |s| s.rev > before).await
    }

    /// Next broadcast matching `pred`, skipping others.
    pub async fn next_broadcast<F>(&mut self, pred: F) -> BroadcastMessage
    where
        F: Fn(&BroadcastMessage) -> bool,
    {
        let wait = async {
            loop {
                match self.broadcasts.recv().await {
                    Ok(msg) if pred(&msg) => return msg,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("broadcast closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("timed out waiting for broadcast")
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.task).await;
    }
}

/// Wait until `log` has at least `n` starts.
pub async fn wait_for_starts(fixture: &Fixture, n: usize) -> Vec<Start> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let starts = fixture.starts();
        if starts.len() >= n {
            return starts;
        }
        if Instant::now() > deadline {
            panic!("expected {} starts, got {:?}", n, starts);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Serve one canned ICY response per connection: the given `headers`, then
/// `body`, then either hold the connection open or close it.  Returns the
/// URL and a feed of the raw requests seen.
pub async fn icy_server(
    headers: &'static str,
    body: Vec<u8>,
    hold_open: bool,
) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = seen_tx.send(String::from_utf8_lossy(&request).into_owned());
                let _ = stream.write_all(headers.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.flush().await;
                if hold_open {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            });
        }
    });

    (format!("http://{}/stream", addr), seen_rx)
}

/// `[metaint audio bytes][block]` for each frame; `None` is an empty block.
pub fn icy_body(metaint: usize, frames: &[Option<&str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend(std::iter::repeat(0x55).take(metaint));
        match frame {
            Some(text) => out.extend(deck_engine::icy::encode_block(text)),
            None => out.push(0),
        }
    }
    out
}
