//! Offline render of a MIDI-like file to mp3.
//!
//! Two fire-and-wait steps: the export backend writes
//! `<output_dir>/<media>-<font>.wav`, the transcoder turns it into the
//! matching `.mp3`, and the wav is removed.  Nothing here is supervised by
//! the engine; the caller spawns [`export`] and gets one result back.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use deck_proto::media::file_stem;
use deck_proto::platform;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, BackendTable, LaunchTarget};
use crate::error::{EngineError, Result};

/// Everything an export run needs, captured up front so the run can leave
/// the engine loop.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub media: PathBuf,
    pub soundfont: PathBuf,
    pub output_dir: PathBuf,
}

impl ExportJob {
    fn stem(&self) -> String {
        format!("{}-{}", file_stem(&self.media), file_stem(&self.soundfont))
    }

    pub fn wav_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.wav", self.stem()))
    }

    pub fn mp3_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp3", self.stem()))
    }
}

/// Run both steps and return the mp3 path.
pub async fn export(backends: &BackendTable, job: &ExportJob) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&job.output_dir)
        .await
        .map_err(|e| EngineError::Export(format!("{}: {}", job.output_dir.display(), e)))?;

    let wav = job.wav_path();
    let mp3 = job.mp3_path();

    let target = LaunchTarget {
        output: Some(wav.clone()),
        ..LaunchTarget::media(job.media.clone(), Some(job.soundfont.clone()))
    };
    let spec = backends.launch_spec(BackendKind::Export, &target)?;
    info!("export: rendering {:?} to {:?}", job.media, wav);
    run_to_completion(&spec.program, &spec.args, EngineError::Export).await?;

    if !wav.exists() {
        return Err(EngineError::Export(format!(
            "{} produced no output",
            spec.program
        )));
    }

    let transcoder = backends.transcoder();
    let args: Vec<OsString> = vec![wav.clone().into(), mp3.clone().into()];
    info!("export: transcoding to {:?}", mp3);
    let transcoded = run_to_completion(transcoder, &args, EngineError::Export).await;

    if let Err(e) = tokio::fs::remove_file(&wav).await {
        warn!("export: could not remove {:?}: {}", wav, e);
    }
    transcoded?;

    info!("export: saved {:?}", mp3);
    Ok(mp3)
}

/// Run `program` to completion and return its stdout.  A non-zero exit
/// becomes `fail(<program, status and stderr>)`.
pub(crate) async fn run_to_completion(
    program: &str,
    args: &[OsString],
    fail: fn(String) -> EngineError,
) -> Result<Vec<u8>> {
    let resolved =
        platform::find_binary(program).ok_or_else(|| EngineError::BinaryNotFound(program.to_string()))?;
    debug!("run: {:?} {:?}", resolved, args);

    let output = tokio::process::Command::new(&resolved)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EngineError::Launch {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(fail(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )))
    }
}

/// Output directory as configured, made absolute.
pub fn resolve_output_dir(configured: &Path) -> PathBuf {
    platform::normalize_path(configured)
}
