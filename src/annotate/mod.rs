//! Draws detections onto images.
//!
//! Boxes are outlined with a thickness proportional to the image size and
//! labelled on a filled black plate using a built-in bitmap font, so output
//! is deterministic and needs no system fonts.

mod font;

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::analysis::{Detection, DetectionPreset};
use crate::error::Result;
use crate::media::ImageFormat;

/// JPEG quality for annotated output.
pub const JPEG_QUALITY: u8 = 90;

const PALETTE: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 255, 0]),
    Rgb([255, 165, 0]),
    Rgb([255, 192, 203]),
    Rgb([128, 0, 128]),
];

const PLATE: Rgb<u8> = Rgb([0, 0, 0]);

/// How boxes are colored and labels placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelStyle {
    /// Colors cycle through a fixed palette; the label sits above the box.
    #[default]
    Cycle,
    /// Color by the emotion after `Person:`; the label shows only the
    /// emotion and sits centered below the box.
    Emotion,
}

impl From<DetectionPreset> for LabelStyle {
    fn from(preset: DetectionPreset) -> Self {
        match preset {
            DetectionPreset::Objects => Self::Cycle,
            DetectionPreset::Emotions => Self::Emotion,
        }
    }
}

/// Renders detections onto a copy of an image.
#[derive(Debug, Clone, Copy, Default)]
pub struct Annotator {
    style: LabelStyle,
}

impl Annotator {
    /// Creates an annotator with the given label style.
    pub fn new(style: LabelStyle) -> Self {
        Self { style }
    }

    /// Label style in use.
    pub fn style(&self) -> LabelStyle {
        self.style
    }

    /// Returns a new RGB image with every detection drawn in order.
    pub fn annotate(&self, source: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = source.to_rgb8();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return canvas;
        }

        let longer = width.max(height);
        let thickness = (longer / 300).max(2);
        let scale = (longer / 400).max(1);

        for (index, detection) in detections.iter().enumerate() {
            let (x0, y0, x1, y1) = detection.bbox.to_pixels(width, height);
            let (text, color) = match self.style {
                LabelStyle::Cycle => (
                    label_text(&detection.label, detection.confidence),
                    PALETTE[index % PALETTE.len()],
                ),
                LabelStyle::Emotion => {
                    let emotion = emotion_of(&detection.label);
                    (
                        label_text(&emotion, detection.confidence),
                        emotion_color(&emotion),
                    )
                }
            };

            draw_box(&mut canvas, (x0, y0, x1, y1), thickness, color);
            self.draw_label(&mut canvas, (x0, y0, x1, y1), &text, scale, color);
        }

        canvas
    }

    fn draw_label(
        &self,
        canvas: &mut RgbImage,
        (x0, y0, x1, y1): (u32, u32, u32, u32),
        text: &str,
        scale: u32,
        color: Rgb<u8>,
    ) {
        if text.is_empty() {
            return;
        }
        let (width, height) = canvas.dimensions();
        let pad = scale;
        let plate_w = font::text_width(text, scale) + 2 * pad;
        let plate_h = font::text_height(scale) + 2 * pad;

        let (plate_x, plate_y) = match self.style {
            LabelStyle::Cycle => {
                let y = if y0 >= plate_h { y0 - plate_h } else { y0 };
                (x0 as i64, y as i64)
            }
            LabelStyle::Emotion => {
                let center = (x0 as i64 + x1 as i64) / 2;
                let x = center - plate_w as i64 / 2;
                let y = if y1 + 1 + plate_h <= height {
                    y1 + 1
                } else {
                    y0.saturating_sub(plate_h)
                };
                (x, y as i64)
            }
        };
        let max_x = (width as i64 - plate_w as i64).max(0);
        let plate_x = plate_x.clamp(0, max_x);

        draw_filled_rect_mut(
            canvas,
            Rect::at(plate_x as i32, plate_y as i32).of_size(plate_w, plate_h),
            PLATE,
        );
        font::draw_text(
            canvas,
            plate_x + pad as i64,
            plate_y + pad as i64,
            text,
            scale,
            color,
        );
    }
}

fn draw_box(
    canvas: &mut RgbImage,
    (x0, y0, x1, y1): (u32, u32, u32, u32),
    thickness: u32,
    color: Rgb<u8>,
) {
    for inset in 0..thickness {
        let w = (x1 - x0 + 1).saturating_sub(2 * inset);
        let h = (y1 - y0 + 1).saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((x0 + inset) as i32, (y0 + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

fn label_text(label: &str, confidence: Option<f32>) -> String {
    match confidence {
        Some(c) => format!("{label} {:.0}%", c * 100.0),
        None => label.to_string(),
    }
}

/// Extracts the emotion from a `Person: <emotion>` label.
fn emotion_of(label: &str) -> String {
    label
        .rsplit_once(':')
        .map_or(label, |(_, emotion)| emotion)
        .trim()
        .to_lowercase()
}

fn emotion_color(emotion: &str) -> Rgb<u8> {
    match emotion {
        "happy" => Rgb([0, 255, 0]),
        "sad" => Rgb([0, 0, 255]),
        "angry" => Rgb([255, 0, 0]),
        "surprise" => Rgb([255, 255, 0]),
        "disgust" => Rgb([128, 0, 128]),
        "fear" => Rgb([255, 165, 0]),
        "neutral" => Rgb([128, 128, 128]),
        _ => Rgb([255, 255, 255]),
    }
}

/// Encodes an image in the format implied by `path`'s extension, JPEG when
/// the extension is missing or unknown.
pub fn encode_image(canvas: &RgbImage, path: &Path) -> Result<Vec<u8>> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::from_extension)
        .unwrap_or(ImageFormat::Jpeg);

    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(canvas)?;
        }
        ImageFormat::Png => canvas.write_to(&mut out, image::ImageFormat::Png)?,
        ImageFormat::WebP => canvas.write_to(&mut out, image::ImageFormat::WebP)?,
        ImageFormat::Gif => canvas.write_to(&mut out, image::ImageFormat::Gif)?,
    }
    Ok(out.into_inner())
}
