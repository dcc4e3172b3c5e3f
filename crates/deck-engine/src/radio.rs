//! Radio Stream Reader.
//!
//! A session is two independent pieces:
//!
//! - the stream backend process (mpv), which plays the audio over its own
//!   connection and is monitored like any render job;
//! - a metadata reader task, which opens a second HTTP GET with
//!   `Icy-MetaData: 1`, skips the audio payload and republishes
//!   `StreamTitle` changes as [`EngineEvent::RadioTitle`].
//!
//! Disconnecting stops the process and cancels then joins the reader, so
//! the HTTP body is always dropped before `disconnect` returns.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::HeaderValue;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, BackendTable, LaunchTarget};
use crate::error::Result;
use crate::events::{EngineEvent, EventSender, PlaybackId};
use crate::icy::{self, IcyDecoder};
use crate::process::{ExitPolicy, MonitoredProcess};

/// Upper bound accepted for the `icy-metaint` header.
const MAX_METAINT: usize = 256_000;

pub struct RadioSession {
    pub url: String,
    pub display_title: String,
    process: MonitoredProcess,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RadioSession {
    pub fn id(&self) -> PlaybackId {
        self.process.id()
    }

    pub fn is_paused(&self) -> bool {
        self.process.is_paused()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.process.pause()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.process.resume()
    }
}

pub struct RadioStreamReader {
    client: Client,
    backends: BackendTable,
    policy: Arc<ExitPolicy>,
    events: EventSender,
    read_timeout: Duration,
}

impl RadioStreamReader {
    pub fn new(
        backends: BackendTable,
        policy: Arc<ExitPolicy>,
        events: EventSender,
        read_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(read_timeout)
            .user_agent(concat!("trackdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("radio: custom http client failed ({}), using defaults", e);
                Client::new()
            });
        Self {
            client,
            backends,
            policy,
            events,
            read_timeout,
        }
    }

    /// Start the audio backend for `url` and the metadata reader beside it.
    pub fn connect(&self, url: &str, initial_title: &str) -> Result<RadioSession> {
        let spec = self
            .backends
            .launch_spec(BackendKind::Stream, &LaunchTarget::stream(url))?;
        let id = PlaybackId::next();
        let process = MonitoredProcess::spawn(id, &spec, self.policy.clone(), self.events.clone())?;

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(reader_task(
            id,
            self.client.clone(),
            url.to_string(),
            self.read_timeout,
            cancel.clone(),
            self.events.clone(),
        ));
        info!("radio: session {} connected to {}", id, url);

        Ok(RadioSession {
            url: url.to_string(),
            display_title: initial_title.to_string(),
            process,
            reader: Some(reader),
            cancel,
        })
    }

    /// Stop the backend and join the reader.  Idempotent.
    pub async fn disconnect(&self, session: &mut RadioSession) {
        debug!("radio: disconnecting session {}", session.id());
        session.cancel.cancel();
        session.process.stop(self.policy.stop_grace).await;
        if let Some(reader) = session.reader.take() {
            if let Err(e) = reader.await {
                warn!("radio: reader task for {} failed: {}", session.id(), e);
            }
        }
    }

    /// Tear down after the backend exited on its own.
    pub async fn reap(&self, session: &mut RadioSession) {
        session.cancel.cancel();
        session.process.join().await;
        if let Some(reader) = session.reader.take() {
            let _ = reader.await;
        }
    }
}

/// Why the metadata loop returned.
#[derive(Debug)]
enum ReaderExit {
    /// Server sent no usable `icy-metaint`; titles will not change.
    NoMetadata,
    Ended(String),
}

async fn reader_task(
    id: PlaybackId,
    client: Client,
    url: String,
    read_timeout: Duration,
    cancel: CancellationToken,
    events: EventSender,
) {
    let exit = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("radio: reader {} cancelled", id);
            return;
        }
        exit = read_metadata(id, &client, &url, read_timeout, &events) => exit,
    };

    match exit {
        ReaderExit::NoMetadata => {
            info!("radio: {} has no ICY metadata, keeping initial title", url);
        }
        ReaderExit::Ended(reason) => {
            warn!("radio: metadata reader {} stopped: {}", id, reason);
            let _ = events.send(EngineEvent::RadioStreamEnded { id, reason });
        }
    }
}

async fn read_metadata(
    id: PlaybackId,
    client: &Client,
    url: &str,
    read_timeout: Duration,
    events: &EventSender,
) -> ReaderExit {
    let request = client
        .get(url)
        .header("Icy-MetaData", HeaderValue::from_static("1"))
        .send();
    let response = match tokio::time::timeout(read_timeout, request).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => return ReaderExit::Ended(format!("connect failed: {}", e)),
        Err(_) => return ReaderExit::Ended("timed out connecting".to_string()),
    };
    let response = match response.error_for_status() {
        Ok(r) => r,
        Err(e) => return ReaderExit::Ended(e.to_string()),
    };

    let metaint = response
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|m| (1..=MAX_METAINT).contains(m));
    let Some(metaint) = metaint else {
        return ReaderExit::NoMetadata;
    };
    debug!("radio: reader {} metaint={}", id, metaint);

    let mut decoder = IcyDecoder::new(metaint);
    let mut last_title: Option<String> = None;
    let mut body = response.bytes_stream();

    loop {
        let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return ReaderExit::Ended(format!("read error: {}", e)),
            Ok(None) => return ReaderExit::Ended("stream closed by server".to_string()),
            Err(_) => return ReaderExit::Ended(format!("no data for {:?}", read_timeout)),
        };

        for block in decoder.feed(&chunk) {
            match icy::stream_title(&block) {
                Ok(Some(title)) if last_title.as_deref() != Some(title.as_str()) => {
                    debug!("radio: reader {} title {:?}", id, title);
                    last_title = Some(title.clone());
                    if events.send(EngineEvent::RadioTitle { id, title }).is_err() {
                        return ReaderExit::Ended("engine gone".to_string());
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("radio: reader {} skipping metadata frame: {}", id, e),
            }
        }
    }
}
