//! Frame annotation.
//!
//! Draws, in place on the frame buffer:
//! - one rectangle per classified detection, in its class color
//! - a label above each rectangle with class, confidence, and track id
//! - a per-frame summary line in the top-left corner on a solid background
//!
//! Labels are clamped so they never start above the top edge or left of the
//! left edge of the frame.

mod glyphs;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Deserialize;
use std::str::FromStr;

use crate::classify::{ClassifiedDetection, EntityClass};
use crate::frame::Frame;
use crate::stats::ClassCounts;
use glyphs::{glyph, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const SUMMARY_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const SUMMARY_ORIGIN: (i32, i32) = (10, 10);

/// Which counts a feed's summary line shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Civilian,
    Soldier,
    #[default]
    Both,
}

impl OverlayKind {
    /// Summary wording for one frame's counts.
    pub fn summary(self, counts: &ClassCounts) -> String {
        let civilians = counts.get(EntityClass::Civilian);
        let soldiers = counts.get(EntityClass::Soldier);
        match self {
            OverlayKind::Civilian => format!("Civilians: {civilians}"),
            OverlayKind::Soldier => format!("Soldiers: {soldiers}"),
            OverlayKind::Both => format!("Soldiers: {soldiers} | Civilians: {civilians}"),
        }
    }
}

impl FromStr for OverlayKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "civilian" => Ok(OverlayKind::Civilian),
            "soldier" => Ok(OverlayKind::Soldier),
            "both" => Ok(OverlayKind::Both),
            other => Err(anyhow!(
                "unknown overlay '{}'; expected civilian, soldier or both",
                other
            )),
        }
    }
}

/// Label text for one detection: class, two-decimal confidence, track id.
pub fn label_text(det: &ClassifiedDetection) -> String {
    let mut text = format!("{} {:.2}", det.class.label(), det.detection.confidence);
    if let Some(id) = det.detection.track_id {
        text.push_str(&format!(" ID:{id}"));
    }
    text
}

/// Draws detection boxes, labels, and the summary line.
#[derive(Clone, Debug)]
pub struct Annotator {
    stroke: u32,
    label_scale: u32,
    summary_scale: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            stroke: 3,
            label_scale: 2,
            summary_scale: 3,
        }
    }
}

impl Annotator {
    pub fn new(stroke: u32, label_scale: u32, summary_scale: u32) -> Self {
        Self {
            stroke: stroke.max(1),
            label_scale: label_scale.max(1),
            summary_scale: summary_scale.max(1),
        }
    }

    pub fn annotate(&self, frame: &mut Frame, detections: &[ClassifiedDetection], summary: &str) {
        let image = frame.image_mut();
        for det in detections {
            self.draw_detection(image, det);
        }
        self.draw_summary(image, summary);
    }

    pub fn draw_detection(&self, image: &mut RgbImage, det: &ClassifiedDetection) {
        let color = det.class.color();
        let bbox = det.detection.bbox.clamp_to(image.width(), image.height());
        let x1 = bbox.x1.round() as i32;
        let y1 = bbox.y1.round() as i32;
        let x2 = bbox.x2.round() as i32;
        let y2 = bbox.y2.round() as i32;
        for inset in 0..self.stroke as i32 {
            let w = x2 - x1 - 2 * inset;
            let h = y2 - y1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let text = label_text(det);
        let pad = 2 * self.label_scale;
        let (text_w, text_h) = text_size(&text, self.label_scale);
        let box_w = text_w + 2 * pad;
        let box_h = text_h + 2 * pad;
        let left = x1.max(0);
        let top = (y1 - box_h as i32 - self.stroke as i32).max(0);
        draw_filled_rect_mut(image, Rect::at(left, top).of_size(box_w, box_h), color);
        draw_text(
            image,
            left + pad as i32,
            top + pad as i32,
            &text,
            self.label_scale,
            TEXT_COLOR,
        );
    }

    pub fn draw_summary(&self, image: &mut RgbImage, text: &str) {
        if text.is_empty() {
            return;
        }
        let pad = 3 * self.summary_scale;
        let (text_w, text_h) = text_size(text, self.summary_scale);
        let (x, y) = SUMMARY_ORIGIN;
        draw_filled_rect_mut(
            image,
            Rect::at(x, y).of_size(text_w + 2 * pad, text_h + 2 * pad),
            SUMMARY_BACKGROUND,
        );
        draw_text(
            image,
            x + pad as i32,
            y + pad as i32,
            text,
            self.summary_scale,
            TEXT_COLOR,
        );
    }
}

/// Pixel size of `text` at `scale`; never zero so it can size a `Rect`.
fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let width = (chars * GLYPH_ADVANCE).saturating_sub(1).max(1) * scale;
    (width, GLYPH_HEIGHT * scale)
}

fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: u32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let scale = scale as i32;
    let mut pen_x = x;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH as i32 {
                    if (bits >> (GLYPH_WIDTH as i32 - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen_x + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE as i32 * scale;
    }
}
