//! Media layer: video containers in, JPEG frames out.
//!
//! Frame extraction is abstracted behind [`FrameSource`] /
//! [`FrameSourceFactory`] so the video service and the tests wire their own
//! decoders through constructors. The production factory shells out to the
//! external `ffmpeg` binary (MJPEG over image2pipe) and probes the container
//! with `ffprobe` first — an unreadable container fails with
//! `VIDEO_OPEN_FAILED` before any frame work starts.
//!
//! Frames carry raw JPEG bytes. Base64 never appears in this layer.

pub mod service;

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::config::components::MediaConfig;
use crate::errors::{ErrorKind, ForgeError};

/// One extracted frame: its index in the stream and its JPEG encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub jpeg: Vec<u8>,
}

/// A sequential frame decoder over one opened video.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// The next frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, ForgeError>;

    /// Total frame count when the container reports one.
    fn total_frames(&self) -> Option<u64>;

    /// Release decoder resources. Also invoked implicitly on drop.
    async fn close(&mut self) {}
}

/// Opens videos into frame sources. The service holds one of these; tests
/// inject synthetic factories.
#[async_trait::async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ForgeError>;
}

/// Production factory: external ffmpeg/ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSourceFactory {
    media: MediaConfig,
}

impl FfmpegSourceFactory {
    pub fn new(media: MediaConfig) -> Self {
        Self { media }
    }

    /// Ask ffprobe for the video stream's frame count. A probe failure means
    /// the container is unreadable; `N/A` frame counts are tolerated.
    async fn probe(&self, path: &Path) -> Result<Option<u64>, ForgeError> {
        let output = Command::new(&self.media.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=nb_frames",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| open_failed(path, format!("ffprobe did not start: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(open_failed(path, stderr.trim().to_string()));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.trim().parse::<u64>().ok())
    }
}

fn open_failed(path: &Path, reason: impl std::fmt::Display) -> ForgeError {
    ForgeError::new(
        ErrorKind::VideoOpenFailed,
        format!("cannot open video {}: {}", path.display(), reason),
    )
}

#[async_trait::async_trait]
impl FrameSourceFactory for FfmpegSourceFactory {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ForgeError> {
        let total = self.probe(path).await?;

        let mut child = Command::new(&self.media.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v"])
            .arg(self.media.jpeg_quality.to_string())
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| open_failed(path, format!("ffmpeg did not start: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| open_failed(path, "ffmpeg produced no output stream"))?;

        Ok(Box::new(FfmpegFrameSource {
            child,
            stdout: BufReader::new(stdout),
            buf: Vec::with_capacity(256 * 1024),
            next_index: 0,
            total,
            eof: false,
        }))
    }
}

/// Frame source reading MJPEG off an ffmpeg child process.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    buf: Vec<u8>,
    next_index: u64,
    total: Option<u64>,
    eof: bool,
}

#[async_trait::async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, ForgeError> {
        loop {
            // Drop any inter-frame noise so a frame always starts at SOI.
            match self.buf.windows(2).position(|w| w == [0xFF, 0xD8]) {
                Some(pos) if pos > 0 => {
                    self.buf.drain(..pos);
                }
                None if self.buf.len() > 1 => {
                    let keep = self.buf.len() - 1;
                    self.buf.drain(..keep);
                }
                _ => {}
            }
            if let Some(end) = complete_jpeg_end(&self.buf) {
                let jpeg: Vec<u8> = self.buf.drain(..end).collect();
                let frame = Frame {
                    index: self.next_index,
                    jpeg,
                };
                self.next_index += 1;
                return Ok(Some(frame));
            }
            if self.eof {
                if self.buf.len() >= 2 {
                    return Err(ForgeError::new(
                        ErrorKind::FrameDecodeFailed,
                        "stream ended inside a frame",
                    ));
                }
                return Ok(None);
            }

            let mut chunk = [0u8; 64 * 1024];
            let n = self.stdout.read(&mut chunk).await.map_err(|e| {
                ForgeError::new(ErrorKind::FrameDecodeFailed, format!("stream read failed: {}", e))
            })?;
            if n == 0 {
                self.eof = true;
                let status = self.child.wait().await.map_err(|e| {
                    ForgeError::new(
                        ErrorKind::FrameDecodeFailed,
                        format!("decoder exit status unavailable: {}", e),
                    )
                })?;
                if !status.success() && self.next_index == 0 {
                    return Err(ForgeError::new(
                        ErrorKind::VideoOpenFailed,
                        "decoder produced no frames",
                    ));
                }
                if !status.success() {
                    return Err(ForgeError::new(
                        ErrorKind::FrameDecodeFailed,
                        format!("decoder exited with {}", status),
                    ));
                }
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn total_frames(&self) -> Option<u64> {
        self.total
    }

    async fn close(&mut self) {
        // kill_on_drop covers abnormal paths; this makes shutdown prompt.
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Byte offset one past the EOI marker of the first complete JPEG in `buf`,
/// or `None` when more data is needed.
///
/// Walks JPEG segments rather than scanning for `FFD9`, because the EOI
/// byte pair can legitimately occur inside entropy-coded data.
fn complete_jpeg_end(buf: &[u8]) -> Option<usize> {
    // SOI
    if buf.len() < 2 || buf[0] != 0xFF || buf[1] != 0xD8 {
        // Tolerate leading junk between frames by searching for SOI.
        let start = buf.windows(2).position(|w| w == [0xFF, 0xD8])?;
        return complete_jpeg_end(&buf[start..]).map(|end| start + end);
    }

    let mut i = 2usize;
    loop {
        // Expect a marker.
        if i + 1 >= buf.len() {
            return None;
        }
        if buf[i] != 0xFF {
            // Corrupt stream; resynchronize at the next SOI.
            return None;
        }
        let marker = buf[i + 1];
        match marker {
            0xD9 => return Some(i + 2), // EOI
            // Standalone markers without a length field.
            0x01 | 0xD0..=0xD7 => i += 2,
            0xDA => {
                // SOS: skip the header, then the entropy-coded segment.
                if i + 3 >= buf.len() {
                    return None;
                }
                let len = u16::from_be_bytes([buf[i + 2], buf[i + 3]]) as usize;
                let mut j = i + 2 + len;
                loop {
                    if j + 1 >= buf.len() {
                        return None;
                    }
                    if buf[j] == 0xFF {
                        match buf[j + 1] {
                            0x00 | 0xD0..=0xD7 => j += 2, // stuffing / restart
                            0xFF => j += 1,
                            _ => {
                                i = j;
                                break;
                            }
                        }
                    } else {
                        j += 1;
                    }
                }
            }
            _ => {
                if i + 3 >= buf.len() {
                    return None;
                }
                let len = u16::from_be_bytes([buf[i + 2], buf[i + 3]]) as usize;
                i += 2 + len;
            }
        }
    }
}
