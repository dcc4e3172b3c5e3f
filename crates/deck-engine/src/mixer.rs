//! System output volume through a PipeWire-style mixer command.
//!
//! `<mixer> get-volume <sink>` prints `Volume: 0.45` (optionally followed by
//! `[MUTED]`); `<mixer> set-volume <sink> 45%` sets it.  Both are
//! fire-and-wait runs off the engine loop.

use std::ffi::OsString;

use tracing::debug;

use crate::backend::BackendTable;
use crate::error::{EngineError, Result};
use crate::export::run_to_completion;

pub const MAX_VOLUME: u8 = 100;

pub async fn get_volume(backends: &BackendTable) -> Result<u8> {
    let args: Vec<OsString> = vec!["get-volume".into(), backends.mixer_sink().into()];
    let stdout = run_to_completion(backends.mixer(), &args, EngineError::Mixer).await?;
    let text = String::from_utf8_lossy(&stdout);
    parse_volume(&text)
        .ok_or_else(|| EngineError::Mixer(format!("unreadable volume {:?}", text.trim())))
}

/// Set the volume, clamped to [`MAX_VOLUME`], and return what was applied.
pub async fn set_volume(backends: &BackendTable, percent: u8) -> Result<u8> {
    let percent = percent.min(MAX_VOLUME);
    let args: Vec<OsString> = vec![
        "set-volume".into(),
        backends.mixer_sink().into(),
        format!("{}%", percent).into(),
    ];
    debug!("mixer: volume {}%", percent);
    run_to_completion(backends.mixer(), &args, EngineError::Mixer).await?;
    Ok(percent)
}

/// Second whitespace-separated token as a 0.0-1.0 fraction, in percent.
pub fn parse_volume(output: &str) -> Option<u8> {
    let fraction: f64 = output.split_whitespace().nth(1)?.parse().ok()?;
    if !fraction.is_finite() || fraction < 0.0 {
        return None;
    }
    Some((fraction * 100.0).round().min(f64::from(MAX_VOLUME)) as u8)
}
