//! Built-in analysis plugins.
//!
//! Two diagnostic-grade plugins ship with the service and back the default
//! pipeline definitions:
//!
//! - **frame-probe**: per-frame JPEG statistics (dimensions, luma summary)
//!   and a thumbnail tool that produces a base64 annotated image. Its tools
//!   use direct handler bindings.
//! - **motion**: frame-differencing over the luma mean, keeping one float of
//!   state per plugin instance. Its tool is bound through a dispatch key.
//!
//! Production analysis plugins (OCR engines, object detectors) are expected
//! to be linked in the same way through the factory table.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::errors::{ErrorKind, ForgeError};
use crate::plugins::{PluginFactory, ToolBinding, ToolDescriptor, ToolInput, VisionPlugin};
use crate::sanitize::{encode_image_base64, finite_number};

/// Identifier of the frame statistics plugin.
pub const FRAME_PROBE_PLUGIN_ID: &str = "frame-probe";
/// Identifier of the motion detection plugin.
pub const MOTION_PLUGIN_ID: &str = "motion";

/// Factory table enumerated by the loader at startup.
pub fn factories() -> Vec<PluginFactory> {
    vec![|| Arc::new(FrameProbePlugin), || Arc::new(MotionPlugin::new())]
}

fn decode_jpeg(bytes: &[u8]) -> Result<image::DynamicImage, ForgeError> {
    image::load_from_memory(bytes)
        .map_err(|e| ForgeError::invalid_input(format!("could not decode image: {}", e)))
}

/// Luma summary over a decoded frame.
fn luma_stats(img: &image::DynamicImage) -> (f64, u8, u8) {
    let luma = img.to_luma8();
    let mut sum: u64 = 0;
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for p in luma.pixels() {
        let v = p.0[0];
        sum += u64::from(v);
        min = min.min(v);
        max = max.max(v);
    }
    let count = luma.pixels().len().max(1) as f64;
    (sum as f64 / count, min, max)
}

fn probe_sync(bytes: &[u8]) -> Result<Value, ForgeError> {
    let img = decode_jpeg(bytes)?;
    let (mean, min, max) = luma_stats(&img);
    Ok(json!({
        "width": img.width(),
        "height": img.height(),
        "luma": {
            "mean": finite_number(mean)?,
            "min": min,
            "max": max,
        },
    }))
}

fn thumbnail_sync(bytes: &[u8], max_dim: u32) -> Result<Value, ForgeError> {
    let img = decode_jpeg(bytes)?;
    let thumb = img.thumbnail(max_dim, max_dim);
    let mut encoded = Vec::new();
    thumb
        .to_rgb8()
        .write_to(
            &mut std::io::Cursor::new(&mut encoded),
            image::ImageFormat::Jpeg,
        )
        .map_err(|e| ForgeError::internal(format!("thumbnail encoding failed: {}", e)))?;
    Ok(json!({
        "width": thumb.width(),
        "height": thumb.height(),
        "thumbnail_base64": encode_image_base64(&encoded),
    }))
}

/// Offload CPU-bound image work so handler futures never starve the event
/// loop.
async fn run_blocking<F>(image: Arc<Vec<u8>>, f: F) -> Result<Value, ForgeError>
where
    F: FnOnce(&[u8]) -> Result<Value, ForgeError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&image))
        .await
        .map_err(|e| ForgeError::internal(format!("image task failed: {}", e)))?
}

/// Per-frame JPEG statistics.
#[derive(Debug, Clone)]
pub struct FrameProbePlugin;

impl VisionPlugin for FrameProbePlugin {
    fn name(&self) -> &str {
        FRAME_PROBE_PLUGIN_ID
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn description(&self) -> &str {
        "Frame dimension and luminance statistics"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["image".into()]
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        let probe_exec: crate::plugins::ToolExecFn = Arc::new(|input: ToolInput| {
            Box::pin(async move {
                let image = input
                    .image
                    .clone()
                    .ok_or_else(|| ForgeError::invalid_input("payload carries no image data"))?;
                run_blocking(image, probe_sync).await
            })
        });

        let thumbnail_exec: crate::plugins::ToolExecFn = Arc::new(|input: ToolInput| {
            Box::pin(async move {
                let image = input
                    .image
                    .clone()
                    .ok_or_else(|| ForgeError::invalid_input("payload carries no image data"))?;
                let max_dim = input
                    .data
                    .get("max_dim")
                    .and_then(Value::as_u64)
                    .unwrap_or(64)
                    .clamp(8, 1024) as u32;
                run_blocking(image, move |bytes| thumbnail_sync(bytes, max_dim)).await
            })
        });

        vec![
            ToolDescriptor::new(
                "probe",
                "Report frame dimensions and a luma summary",
                json!({
                    "type": "object",
                    "properties": {
                        "frame_index": { "type": "integer", "minimum": 0 }
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "width": { "type": "integer" },
                        "height": { "type": "integer" },
                        "luma": {
                            "type": "object",
                            "properties": {
                                "mean": { "type": "number" },
                                "min": { "type": "integer" },
                                "max": { "type": "integer" }
                            }
                        }
                    }
                }),
                ToolBinding::Handler(probe_exec),
            ),
            ToolDescriptor::new(
                "thumbnail",
                "Produce a downscaled JPEG of the frame, base64-encoded",
                json!({
                    "type": "object",
                    "properties": {
                        "max_dim": { "type": "integer", "minimum": 8, "maximum": 1024 }
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "width": { "type": "integer" },
                        "height": { "type": "integer" },
                        "thumbnail_base64": { "type": "string" }
                    }
                }),
                ToolBinding::Handler(thumbnail_exec),
            ),
        ]
    }
}

/// Frame-differencing over the luma mean.
///
/// Keeps the previous frame's mean as session state. A fresh instance (one
/// per registration) starts from a baseline frame.
#[derive(Debug)]
pub struct MotionPlugin {
    last_mean: Mutex<Option<f64>>,
}

/// Luma delta above which a frame counts as changed.
const MOTION_THRESHOLD: f64 = 8.0;

impl MotionPlugin {
    pub fn new() -> Self {
        Self {
            last_mean: Mutex::new(None),
        }
    }

    /// The current frame's luma mean: taken from an upstream probe result
    /// when present, computed from the raw frame otherwise.
    async fn resolve_mean(&self, input: &ToolInput) -> Result<f64, ForgeError> {
        let from_data = input
            .data
            .get("luma")
            .and_then(|l| l.get("mean"))
            .or_else(|| input.data.get("luma_mean"))
            .and_then(Value::as_f64);
        if let Some(mean) = from_data {
            if !mean.is_finite() {
                return Err(ForgeError::new(
                    ErrorKind::JsonUnsafe,
                    "upstream luma mean is not finite",
                ));
            }
            return Ok(mean);
        }
        let image = input.image.clone().ok_or_else(|| {
            ForgeError::invalid_input("payload carries neither a luma mean nor image data")
        })?;
        let value = run_blocking(image, |bytes| {
            let img = decode_jpeg(bytes)?;
            let (mean, _, _) = luma_stats(&img);
            finite_number(mean)
        })
        .await?;
        value
            .as_f64()
            .ok_or_else(|| ForgeError::internal("luma mean did not round-trip as a number"))
    }
}

impl Default for MotionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VisionPlugin for MotionPlugin {
    fn name(&self) -> &str {
        MOTION_PLUGIN_ID
    }

    fn version(&self) -> &str {
        "1.0.1"
    }

    fn description(&self) -> &str {
        "Frame-differencing motion detector"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["image".into(), "stateful".into()]
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "detect",
            "Score frame-to-frame luminance change",
            json!({
                "type": "object",
                "properties": {
                    "luma": {
                        "type": "object",
                        "properties": { "mean": { "type": "number" } }
                    }
                }
            }),
            json!({
                "type": "object",
                "properties": {
                    "motion_score": { "type": "number" },
                    "changed": { "type": "boolean" },
                    "baseline": { "type": "boolean" }
                }
            }),
            ToolBinding::Dispatch("detect".to_string()),
        )]
    }

    async fn dispatch(&self, tool: &str, input: ToolInput) -> Result<Value, ForgeError> {
        match tool {
            "detect" => {
                let mean = self.resolve_mean(&input).await?;
                let previous = {
                    let mut guard = self.last_mean.lock().unwrap_or_else(|e| e.into_inner());
                    guard.replace(mean)
                };
                let (score, baseline) = match previous {
                    Some(prev) => ((mean - prev).abs(), false),
                    None => (0.0, true),
                };
                Ok(json!({
                    "motion_score": finite_number(score)?,
                    "changed": !baseline && score > MOTION_THRESHOLD,
                    "baseline": baseline,
                }))
            }
            other => Err(ForgeError::tool_not_found(
                self.name(),
                other,
                vec!["detect".into()],
            )),
        }
    }
}
