#![allow(dead_code)]
//! Shared fixtures for the integration tests: synthetic frame sources,
//! tiny JPEG payloads, and state wiring with the builtin plugins loaded.

use std::path::Path;
use std::sync::Arc;

use forgesyte::errors::{ErrorKind, ForgeError};
use forgesyte::media::{Frame, FrameSource, FrameSourceFactory};
use forgesyte::pipeline::{self, PipelineStore};
use forgesyte::plugins;
use forgesyte::state::ForgeState;

/// A JPEG of a `size`x`size` flat gray square at the given level.
pub fn tiny_jpeg(level: u8, size: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(size, size, image::Rgb([level, level, level]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    out
}

/// In-memory frame source used instead of the ffmpeg decoder.
pub struct SyntheticSource {
    frames: Vec<Vec<u8>>,
    pos: usize,
}

#[async_trait::async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, ForgeError> {
        if self.pos >= self.frames.len() {
            return Ok(None);
        }
        let frame = Frame {
            index: self.pos as u64,
            jpeg: self.frames[self.pos].clone(),
        };
        self.pos += 1;
        Ok(Some(frame))
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.frames.len() as u64)
    }
}

/// Factory handing out [`SyntheticSource`]s regardless of path.
pub struct SyntheticFactory {
    pub frames: Vec<Vec<u8>>,
    pub fail_open: bool,
}

impl SyntheticFactory {
    pub fn with_gray_frames(levels: &[u8]) -> Self {
        Self {
            frames: levels.iter().map(|l| tiny_jpeg(*l, 8)).collect(),
            fail_open: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            frames: Vec::new(),
            fail_open: true,
        }
    }
}

#[async_trait::async_trait]
impl FrameSourceFactory for SyntheticFactory {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ForgeError> {
        if self.fail_open {
            return Err(ForgeError::new(
                ErrorKind::VideoOpenFailed,
                format!("cannot open video {}: synthetic failure", path.display()),
            ));
        }
        Ok(Box::new(SyntheticSource {
            frames: self.frames.clone(),
            pos: 0,
        }))
    }
}

/// Fresh state with the builtin plugins registered and the shipped pipeline
/// definitions loaded.
pub async fn state_with_builtins() -> Arc<ForgeState> {
    let state = Arc::new(ForgeState::default());
    let report = plugins::load_plugins(
        &state.plugin_registry,
        &plugins::default_factories(),
    )
    .await;
    assert!(
        report.errors.is_empty(),
        "builtin plugins must load cleanly: {:?}",
        report.errors
    );

    let store = pipeline::load_dir(Path::new("pipelines"), &state.plugin_registry)
        .await
        .expect("shipped pipelines load");
    state.set_pipelines(Arc::new(store));
    state
}

/// Pipeline store containing only the shipped definitions, validated
/// against the given state's registry.
pub async fn shipped_pipelines(state: &ForgeState) -> Arc<PipelineStore> {
    let store = pipeline::load_dir(Path::new("pipelines"), &state.plugin_registry)
        .await
        .expect("shipped pipelines load");
    Arc::new(store)
}
