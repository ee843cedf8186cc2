use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::session::{MediaPacket, SessionSource, SipSessionHandle};

const ELEMENTARY_STREAM_SUFFIX: &str = ".h264.partial";
const OUTPUT_SUFFIX: &str = ".mp4";

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Appends raw payload chunks to an elementary stream file.
pub struct FileStreamWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl FileStreamWriter {
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes and closes the file, returning the number of bytes written.
    pub async fn finish(mut self) -> io::Result<u64> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(self.bytes_written)
    }
}

/// Converts a finished elementary stream into a container file.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()>;
}

pub struct FfmpegRemuxer {
    ffmpeg_path: String,
}

impl FfmpegRemuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "h264", "-i"])
            .arg(input)
            .args(["-c", "copy"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                CameraError::RemuxFailed(format!("failed to run {}: {err}", self.ffmpeg_path))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CameraError::RemuxFailed(format!(
                "{} exited with {}: {}",
                self.ffmpeg_path,
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// A bounded-duration capture of one live session.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    output_base: PathBuf,
    duration: Duration,
    packet_received: Arc<AtomicBool>,
}

impl RecordingJob {
    pub fn new(output_base: impl Into<PathBuf>, duration: Duration) -> Result<Self> {
        let output_base = output_base.into();
        if output_base.as_os_str().is_empty() {
            return Err(CameraError::InvalidOutputPath);
        }
        Ok(Self {
            output_base,
            duration,
            packet_received: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elementary_stream_path(&self) -> PathBuf {
        with_suffix(&self.output_base, ELEMENTARY_STREAM_SUFFIX)
    }

    pub fn output_path(&self) -> PathBuf {
        with_suffix(&self.output_base, OUTPUT_SUFFIX)
    }

    pub fn has_received_media(&self) -> bool {
        self.packet_received.load(Ordering::SeqCst)
    }
}

async fn feed_packets(
    mut packets: broadcast::Receiver<MediaPacket>,
    mut writer: FileStreamWriter,
    received: Arc<AtomicBool>,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<FileStreamWriter> {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                drain_queued(&mut packets, &mut writer, &received).await?;
                break;
            }
            packet = packets.recv() => match packet {
                Ok(packet) => {
                    received.store(true, Ordering::SeqCst);
                    writer.write_chunk(&packet.payload).await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "recording fell behind, media packets dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(writer)
}

/// Writes whatever the session emitted before it was stopped.
async fn drain_queued(
    packets: &mut broadcast::Receiver<MediaPacket>,
    writer: &mut FileStreamWriter,
    received: &AtomicBool,
) -> io::Result<()> {
    loop {
        match packets.try_recv() {
            Ok(packet) => {
                received.store(true, Ordering::SeqCst);
                writer.write_chunk(&packet.payload).await?;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "recording fell behind, media packets dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
        }
    }
}

struct PacketFeed {
    stop: oneshot::Sender<()>,
    task: JoinHandle<io::Result<FileStreamWriter>>,
}

impl PacketFeed {
    fn spawn(session: &SipSessionHandle, writer: FileStreamWriter, job: &RecordingJob) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(feed_packets(
            session.video_packets(),
            writer,
            job.packet_received.clone(),
            stop_rx,
        ));
        Self { stop, task }
    }

    async fn finish(self) -> Result<u64> {
        let _ = self.stop.send(());
        let writer = self
            .task
            .await
            .map_err(|err| CameraError::Io(err.to_string()))??;
        Ok(writer.finish().await?)
    }
}

pub struct RecordingPipeline {
    sessions: Arc<dyn SessionSource>,
    remuxer: Arc<dyn Remuxer>,
    attempts: u32,
    attempt_timeout: Duration,
    media_grace: Duration,
}

impl RecordingPipeline {
    pub fn new(
        sessions: Arc<dyn SessionSource>,
        remuxer: Arc<dyn Remuxer>,
        config: &CameraConfig,
    ) -> Self {
        Self {
            sessions,
            remuxer,
            attempts: config.session_attempts,
            attempt_timeout: config.session_attempt_timeout,
            media_grace: config.media_grace,
        }
    }

    /// Each attempt races the acquisition against `attempt_timeout`; a late
    /// acquisition is dropped, which releases its sockets.
    async fn acquire_session(&self) -> Result<SipSessionHandle> {
        for attempt in 1..=self.attempts {
            match timeout(self.attempt_timeout, self.sessions.acquire()).await {
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(err)) => {
                    warn!(attempt, error = %err, "session acquisition failed, retrying");
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "session acquisition timed out, retrying"
                    );
                }
            }
        }
        Err(CameraError::SessionAcquisitionFailed {
            attempts: self.attempts,
        })
    }

    /// Records a live stream to `<output_base>.mp4`. On failure no
    /// intermediate or output file is left behind.
    pub async fn record(&self, output_base: impl Into<PathBuf>, duration: Duration) -> Result<PathBuf> {
        let job = RecordingJob::new(output_base, duration)?;
        let stream_path = job.elementary_stream_path();
        let output_path = job.output_path();
        remove_if_exists(&stream_path).await?;
        remove_if_exists(&output_path).await?;

        let session = self.acquire_session().await?;
        let writer = match FileStreamWriter::create(&stream_path).await {
            Ok(writer) => writer,
            Err(err) => {
                let _ = session.stop().await;
                return Err(err.into());
            }
        };
        let feed = PacketFeed::spawn(&session, writer, &job);

        if let Err(err) = session.start().await {
            let _ = feed.finish().await;
            let _ = remove_if_exists(&stream_path).await;
            return Err(err);
        }
        info!(path = %output_path.display(), duration_ms = duration.as_millis() as u64, "recording started");

        sleep(self.media_grace).await;
        if !job.has_received_media() {
            warn!(grace_ms = self.media_grace.as_millis() as u64, "no media received, aborting recording");
            if let Err(err) = session.stop().await {
                warn!(error = %err, "failed to stop session");
            }
            let _ = feed.finish().await;
            remove_if_exists(&stream_path).await?;
            return Err(CameraError::NoMediaReceived);
        }

        sleep(duration.saturating_sub(self.media_grace)).await;
        if let Err(err) = session.stop().await {
            warn!(error = %err, "failed to stop session");
        }

        let written = match feed.finish().await {
            Ok(written) => written,
            Err(err) => {
                let _ = remove_if_exists(&stream_path).await;
                return Err(err);
            }
        };
        debug!(bytes = written, path = %stream_path.display(), "elementary stream finalized");

        if let Err(err) = self.remuxer.remux(&stream_path, &output_path).await {
            let _ = remove_if_exists(&stream_path).await;
            let _ = remove_if_exists(&output_path).await;
            return Err(err);
        }
        remove_if_exists(&stream_path).await?;

        info!(path = %output_path.display(), "recording complete");
        Ok(output_path)
    }
}
