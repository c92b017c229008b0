//! Identity tracking for detectors that do not track on their own.
//!
//! `IouTracker` carries boxes from one frame to the next and greedily matches
//! them against new detections of the same class by IoU. A matched detection
//! inherits the track id; an unmatched one starts a new track. Tracks that go
//! unmatched for more than `max_missing` frames are forgotten, so an entity
//! that leaves and re-enters later is counted as a new identity.

use anyhow::Result;
use std::cmp::Ordering;

use super::backend::DetectorBackend;
use super::result::{BoundingBox, Detection};
use crate::frame::Frame;

const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
const DEFAULT_MAX_MISSING: u32 = 30;

#[derive(Clone, Debug)]
struct Track {
    id: u32,
    class_id: u32,
    bbox: BoundingBox,
    missing: u32,
}

/// Greedy IoU multi-object tracker.
#[derive(Clone, Debug)]
pub struct IouTracker {
    tracks: Vec<Track>,
    next_id: u32,
    iou_threshold: f32,
    max_missing: u32,
}

impl IouTracker {
    pub fn new(iou_threshold: f32, max_missing: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            max_missing,
        }
    }

    /// Number of live tracks (matched recently enough to be kept).
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Assign track ids to the detections of one frame, in place.
    ///
    /// Detections that already carry an id are left untouched.
    pub fn update(&mut self, detections: &mut [Detection]) {
        for track in &mut self.tracks {
            track.missing = track.missing.saturating_add(1);
        }

        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (track_idx, track) in self.tracks.iter().enumerate() {
            for (det_idx, det) in detections.iter().enumerate() {
                if det.track_id.is_some() || det.class_id != track.class_id {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.iou_threshold {
                    pairs.push((iou, track_idx, det_idx));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        for (_, track_idx, det_idx) in pairs {
            if track_taken[track_idx] || det_taken[det_idx] {
                continue;
            }
            track_taken[track_idx] = true;
            det_taken[det_idx] = true;
            let track = &mut self.tracks[track_idx];
            track.bbox = detections[det_idx].bbox;
            track.missing = 0;
            detections[det_idx].track_id = Some(track.id);
        }

        for (det_idx, det) in detections.iter_mut().enumerate() {
            if det_taken[det_idx] || det.track_id.is_some() {
                continue;
            }
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            det.track_id = Some(id);
            self.tracks.push(Track {
                id,
                class_id: det.class_id,
                bbox: det.bbox,
                missing: 0,
            });
        }

        let max_missing = self.max_missing;
        self.tracks.retain(|track| track.missing <= max_missing);
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_MISSING)
    }
}

/// A detector backend with an `IouTracker` bolted on.
pub struct TrackingDetector<B: DetectorBackend> {
    inner: B,
    tracker: IouTracker,
}

impl<B: DetectorBackend> TrackingDetector<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            tracker: IouTracker::default(),
        }
    }

    pub fn with_limits(mut self, iou_threshold: f32, max_missing: u32) -> Self {
        self.tracker = IouTracker::new(iou_threshold, max_missing);
        self
    }
}

impl<B: DetectorBackend> DetectorBackend for TrackingDetector<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn provides_tracking(&self) -> bool {
        true
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = self.inner.detect(frame)?;
        self.tracker.update(&mut detections);
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, class_id: u32) -> Detection {
        Detection::new(BoundingBox::new(x, 10.0, x + 20.0, 50.0), class_id, 0.9)
    }

    #[test]
    fn keeps_identity_across_small_moves() {
        let mut tracker = IouTracker::default();
        let mut frame1 = vec![det(0.0, 1), det(200.0, 0)];
        tracker.update(&mut frame1);
        assert_eq!(frame1[0].track_id, Some(1));
        assert_eq!(frame1[1].track_id, Some(2));

        let mut frame2 = vec![det(203.0, 0), det(2.0, 1)];
        tracker.update(&mut frame2);
        assert_eq!(frame2[0].track_id, Some(2));
        assert_eq!(frame2[1].track_id, Some(1));
    }

    #[test]
    fn class_change_starts_new_track() {
        let mut tracker = IouTracker::default();
        let mut frame1 = vec![det(0.0, 1)];
        tracker.update(&mut frame1);
        let mut frame2 = vec![det(0.0, 0)];
        tracker.update(&mut frame2);
        assert_eq!(frame2[0].track_id, Some(2));
    }

    #[test]
    fn expired_tracks_are_forgotten() {
        let mut tracker = IouTracker::new(0.3, 2);
        let mut first = vec![det(0.0, 1)];
        tracker.update(&mut first);
        for _ in 0..3 {
            tracker.update(&mut []);
        }
        assert_eq!(tracker.active_tracks(), 0);
        let mut again = vec![det(0.0, 1)];
        tracker.update(&mut again);
        assert_eq!(again[0].track_id, Some(2));
    }

    #[test]
    fn short_gaps_keep_identity() {
        let mut tracker = IouTracker::new(0.3, 2);
        let mut first = vec![det(0.0, 1)];
        tracker.update(&mut first);
        tracker.update(&mut []);
        let mut back = vec![det(1.0, 1)];
        tracker.update(&mut back);
        assert_eq!(back[0].track_id, Some(1));
    }

    #[test]
    fn existing_ids_are_preserved() {
        let mut tracker = IouTracker::default();
        let mut frame = vec![det(0.0, 1).with_track_id(42)];
        tracker.update(&mut frame);
        assert_eq!(frame[0].track_id, Some(42));
        assert_eq!(tracker.active_tracks(), 0);
    }
}
