//! Extracts summaries and detections from model output.
//!
//! Models do not always honor the requested format: replies may be wrapped in
//! Markdown fences, nested under a key, or use `box_2d` (Gemini's native
//! `[y_min, x_min, y_max, x_max]` on a 0-1000 grid) instead of `box`. Individual
//! entries that cannot be understood are dropped with a warning; only a reply
//! that is not structured data at all is an error.

use serde_json::{Map, Value};

use crate::analysis::types::{AnalysisResult, BoundingBox, CoordinateSpace, Detection};
use crate::error::{MediaSightError, Result};

/// Scale of Gemini's native `box_2d` coordinates.
const BOX_2D_SCALE: f32 = 1000.0;

/// Keys under which a detection list may be nested.
const LIST_KEYS: [&str; 5] = ["detections", "objects", "boxes", "items", "results"];

/// Builds a text summary from a video analysis reply.
pub fn parse_summary(text: &str) -> AnalysisResult {
    AnalysisResult::TextSummary(text.trim().to_string())
}

/// Builds a detection set from an image analysis reply.
pub fn parse_detections(text: &str) -> Result<AnalysisResult> {
    let value = parse_structured(text)?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let nested = LIST_KEYS
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                });
            match nested {
                Some(items) => items,
                None if looks_like_detection(&map) => vec![Value::Object(map)],
                None => {
                    return Err(MediaSightError::MalformedResponse(
                        "JSON object contains no detection list".into(),
                    ))
                }
            }
        }
        other => {
            return Err(MediaSightError::MalformedResponse(format!(
                "expected a JSON array of detections, got {}",
                json_type(&other)
            )))
        }
    };

    let total = entries.len();
    let detections: Vec<Detection> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match parse_entry(entry) {
            Ok(detection) => Some(detection),
            Err(reason) => {
                tracing::warn!(index, %reason, "skipping malformed detection");
                None
            }
        })
        .collect();

    tracing::debug!(total, kept = detections.len(), "parsed detections");
    Ok(AnalysisResult::DetectionSet(detections))
}

/// Removes a Markdown code fence around the payload, if there is one.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_ticks = &trimmed[start + 3..];
    // Drop the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match after_ticks.find('\n') {
        Some(newline) => &after_ticks[newline + 1..],
        None => after_ticks,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn parse_structured(text: &str) -> Result<Value> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(MediaSightError::MalformedResponse("empty response".into()));
    }

    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(err) => {
            // Prose around the array, e.g. "Here are the objects: [...]".
            if let (Some(open), Some(close)) = (body.find('['), body.rfind(']')) {
                if open < close {
                    if let Ok(value) = serde_json::from_str(&body[open..=close]) {
                        return Ok(value);
                    }
                }
            }
            Err(MediaSightError::MalformedResponse(format!(
                "response is not JSON: {err}"
            )))
        }
    }
}

fn looks_like_detection(map: &Map<String, Value>) -> bool {
    ["box", "bbox", "box_2d"].iter().any(|k| map.contains_key(*k))
}

fn parse_entry(entry: &Value) -> std::result::Result<Detection, String> {
    let map = entry
        .as_object()
        .ok_or_else(|| format!("expected object, got {}", json_type(entry)))?;

    let label = ["label", "name", "object"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or("missing label")?;

    let bbox = if let Some(raw) = map.get("box").or_else(|| map.get("bbox")) {
        let [x0, y0, x1, y1] = four_coordinates(raw)?;
        let space = if [x0, y0, x1, y1].iter().all(|v| *v <= 1.0) {
            CoordinateSpace::Normalized
        } else {
            CoordinateSpace::Pixel
        };
        BoundingBox::new(x0, y0, x1, y1, space)
    } else if let Some(raw) = map.get("box_2d") {
        let [y0, x0, y1, x1] = four_coordinates(raw)?;
        if [y0, x0, y1, x1].iter().any(|v| *v > BOX_2D_SCALE) {
            return Err("box_2d coordinate above 1000".into());
        }
        BoundingBox::new(
            x0 / BOX_2D_SCALE,
            y0 / BOX_2D_SCALE,
            x1 / BOX_2D_SCALE,
            y1 / BOX_2D_SCALE,
            CoordinateSpace::Normalized,
        )
    } else {
        return Err("missing box".into());
    };

    let confidence = ["confidence", "score"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_f64))
        .map(|c| c as f32)
        .filter(|c| c.is_finite() && (0.0..=1.0).contains(c));

    Ok(Detection {
        label: label.to_string(),
        bbox,
        confidence,
    })
}

fn four_coordinates(raw: &Value) -> std::result::Result<[f32; 4], String> {
    let items = raw.as_array().ok_or("box is not an array")?;
    if items.len() != 4 {
        return Err(format!("box has {} coordinates, expected 4", items.len()));
    }
    let mut out = [0.0f32; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        let v = item.as_f64().ok_or("box coordinate is not a number")? as f32;
        if !v.is_finite() || v < 0.0 {
            return Err(format!("box coordinate {v} out of range"));
        }
        *slot = v;
    }
    Ok(out)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn detections(text: &str) -> Vec<Detection> {
        match parse_detections(text).unwrap() {
            AnalysisResult::DetectionSet(items) => items,
            other => panic!("expected detections, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_is_trimmed() {
        assert_eq!(
            parse_summary("\n  A cat plays with a ball.  \n"),
            AnalysisResult::TextSummary("A cat plays with a ball.".into())
        );
    }

    #[test]
    fn test_single_normalized_box() {
        let items = detections(r#"[{"label":"cat","box":[0.1,0.1,0.5,0.5]}]"#);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "cat");
        assert_eq!(items[0].bbox.corners(), (0.1, 0.1, 0.5, 0.5));
        assert_eq!(items[0].bbox.space(), CoordinateSpace::Normalized);
        assert_eq!(items[0].confidence, None);
    }

    #[test]
    fn test_box_2d_is_converted() {
        let items = detections(r#"[{"box_2d": [100, 200, 500, 800], "label": "sock"}]"#);
        assert_eq!(items[0].bbox.corners(), (0.2, 0.1, 0.8, 0.5));
        assert_eq!(items[0].bbox.space(), CoordinateSpace::Normalized);
    }

    #[test]
    fn test_pixel_box_detected() {
        let items = detections(r#"[{"label":"dog","box":[10,20,300,400],"score":0.9}]"#);
        assert_eq!(items[0].bbox.space(), CoordinateSpace::Pixel);
        assert_eq!(items[0].confidence, Some(0.9));
    }

    #[test]
    fn test_swapped_corners_are_ordered() {
        let items = detections(r#"[{"label":"x","box":[0.9,0.8,0.1,0.2]}]"#);
        let (x0, y0, x1, y1) = items[0].bbox.corners();
        assert!(x0 <= x1 && y0 <= y1);
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let reply = "Here you go:\n```json\n[{\"label\":\"cup\",\"box_2d\":[0,0,1000,1000]}]\n```\nEnjoy";
        assert_eq!(detections(reply).len(), 1);

        let reply = "```\n[]\n```";
        assert!(detections(reply).is_empty());
    }

    #[test]
    fn test_prose_around_array() {
        let reply = r#"I found these: [{"label":"pumpkin","box":[0.1,0.2,0.3,0.4]}] Hope it helps."#;
        assert_eq!(detections(reply)[0].label, "pumpkin");
    }

    #[test]
    fn test_nested_list() {
        let reply = r#"{"detections": [{"name":"book","bbox":[0.1,0.1,0.2,0.2]}]}"#;
        assert_eq!(detections(reply)[0].label, "book");
    }

    #[test]
    fn test_single_object() {
        let reply = r#"{"label":"origami crane","box":[0.1,0.1,0.2,0.2]}"#;
        assert_eq!(detections(reply).len(), 1);
    }

    #[test]
    fn test_empty_array_is_empty_set() {
        assert_eq!(
            parse_detections("[]").unwrap(),
            AnalysisResult::DetectionSet(vec![])
        );
    }

    #[test]
    fn test_one_malformed_among_many_is_skipped() {
        let reply = r#"[
            {"label":"a","box":[0.1,0.1,0.2,0.2]},
            {"label":"b","box":[0.1,0.1,0.2]},
            {"label":"c","box":[0.3,0.3,0.4,0.4]},
            {"label":"d","box":[0.5,0.5,0.6,0.6]}
        ]"#;
        let labels: Vec<_> = detections(reply).into_iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let reply = r#"[
            {"box":[0.1,0.1,0.2,0.2]},
            {"label":"","box":[0.1,0.1,0.2,0.2]},
            {"label":"neg","box":[-0.1,0.1,0.2,0.2]},
            {"label":"text","box":["a",0.1,0.2,0.2]},
            {"label":"big","box_2d":[0,0,1200,900]},
            {"label":"nobox"},
            "just a string",
            {"label":"ok","box":[0.1,0.1,0.2,0.2],"confidence":7.5}
        ]"#;
        let items = detections(reply);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "ok");
        // Out-of-range confidence is dropped, not the detection.
        assert_eq!(items[0].confidence, None);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let original = vec![
            Detection::new(
                "cat",
                BoundingBox::new(0.1, 0.1, 0.5, 0.5, CoordinateSpace::Normalized),
            ),
            Detection::new(
                "ball",
                BoundingBox::new(12.0, 40.0, 64.0, 90.0, CoordinateSpace::Pixel),
            )
            .with_confidence(0.75),
            Detection::new(
                "Person: happy",
                BoundingBox::new(0.0, 0.25, 1.0, 0.75, CoordinateSpace::Normalized),
            ),
        ];
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(detections(&json), original);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        for reply in ["", "   ", "no json here", "[unclosed", "42", r#"{"answer":"none"}"#] {
            let err = parse_detections(reply).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "reply: {reply:?}");
        }
    }
}
