mod common;

use serde_json::json;

use forgesyte::errors::ErrorKind;
use forgesyte::plugins::ToolInput;
use forgesyte::plugins::builtin::{FRAME_PROBE_PLUGIN_ID, MOTION_PLUGIN_ID};
use forgesyte::sanitize::{decode_image_base64, finite_number, sanitize};

#[test]
fn sanitize_is_idempotent_on_nested_values() {
    let v = json!({
        "text": "hello",
        "boxes": [[0, 1, 2, 3], [4, 5, 6, 7]],
        "score": 0.875,
        "nested": { "flags": [true, false, null] }
    });
    let once = sanitize(&v).unwrap();
    assert_eq!(once, v);
    assert_eq!(sanitize(&once).unwrap(), once);
}

#[test]
fn computed_floats_refuse_nan_and_infinity() {
    assert_eq!(
        finite_number(0.0_f64 / 0.0_f64).unwrap_err().kind,
        ErrorKind::JsonUnsafe
    );
    assert_eq!(
        finite_number(f64::NEG_INFINITY).unwrap_err().kind,
        ErrorKind::JsonUnsafe
    );
}

#[tokio::test]
/// Every builtin tool's output passes the sanitizer unchanged: the
/// fixed point of `sanitize` is reached at the registry boundary.
async fn tool_outputs_are_sanitized_fixed_points() {
    let state = common::state_with_builtins().await;
    let jpeg = common::tiny_jpeg(120, 16);

    let probe = state
        .plugin_registry
        .call(
            FRAME_PROBE_PLUGIN_ID,
            "probe",
            ToolInput::with_image(json!({ "frame_index": 0 }), jpeg.clone()),
        )
        .await
        .unwrap();
    assert_eq!(sanitize(&probe).unwrap(), probe);
    // Output is serializable end-to-end.
    serde_json::to_string(&probe).unwrap();

    let thumb = state
        .plugin_registry
        .call(
            FRAME_PROBE_PLUGIN_ID,
            "thumbnail",
            ToolInput::with_image(json!({ "max_dim": 16 }), jpeg.clone()),
        )
        .await
        .unwrap();
    assert_eq!(sanitize(&thumb).unwrap(), thumb);

    // The annotated image crosses the boundary as base64 and decodes back
    // to raw JPEG bytes.
    let encoded = thumb["thumbnail_base64"].as_str().unwrap();
    let decoded = decode_image_base64(encoded).unwrap();
    assert!(decoded.starts_with(&[0xFF, 0xD8]));

    let motion = state
        .plugin_registry
        .call(
            MOTION_PLUGIN_ID,
            "detect",
            ToolInput::with_image(json!({}), jpeg),
        )
        .await
        .unwrap();
    assert_eq!(sanitize(&motion).unwrap(), motion);
}
