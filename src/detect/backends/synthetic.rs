use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Frames per choreography cycle.
const CYCLE_FRAMES: u64 = 90;
const ACTORS_PER_FEED: usize = 5;
/// Class id the model reports for entities outside the recognised set.
const DISTRACTOR_CLASS_ID: u32 = 7;

/// One scripted entity walking a straight line across the frame.
/// Positions and sizes are fractions of the frame dimensions.
#[derive(Clone, Debug)]
struct Actor {
    class_id: u32,
    start: u64,
    duration: u64,
    from: (f32, f32),
    to: (f32, f32),
    size: (f32, f32),
}

/// Deterministic stand-in for a detection model.
///
/// Each feed gets its own choreography, derived from the feed name, of
/// entities crossing the frame plus one distractor with an unrecognised class
/// id. Output depends only on the feed name and the frame index, so repeated
/// playthroughs see the same scene. Track ids are left to the tracker.
pub struct SyntheticBackend {
    seed: u64,
    actors: Vec<Actor>,
}

impl SyntheticBackend {
    pub fn for_feed(feed: &str) -> Self {
        let seed = fnv1a(feed.as_bytes());
        let soldier_share = if feed.contains("soldier") {
            0.8
        } else if feed.contains("civilian") {
            0.2
        } else {
            0.5
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut actors = Vec::with_capacity(ACTORS_PER_FEED + 1);
        for _ in 0..ACTORS_PER_FEED {
            let class_id = if rng.gen_bool(soldier_share) { 1 } else { 0 };
            actors.push(random_actor(&mut rng, class_id));
        }
        actors.push(random_actor(&mut rng, DISTRACTOR_CLASS_ID));
        Self { seed, actors }
    }
}

fn random_actor(rng: &mut StdRng, class_id: u32) -> Actor {
    let start = rng.gen_range(0..CYCLE_FRAMES / 2);
    let duration = rng.gen_range(CYCLE_FRAMES / 3..=CYCLE_FRAMES - start);
    let leftward = rng.gen_bool(0.5);
    let (x0, x1) = if leftward { (0.9, 0.1) } else { (0.1, 0.9) };
    Actor {
        class_id,
        start,
        duration,
        from: (x0, rng.gen_range(0.3..0.8)),
        to: (x1, rng.gen_range(0.3..0.8)),
        size: (rng.gen_range(0.05..0.09), rng.gen_range(0.12..0.2)),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl DetectorBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let t = frame.index % CYCLE_FRAMES;
        let width = frame.width() as f32;
        let height = frame.height() as f32;
        let mut rng = StdRng::seed_from_u64(self.seed ^ t.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let mut detections = Vec::new();
        for actor in &self.actors {
            let jitter: f32 = rng.gen_range(0.0..0.4);
            if t < actor.start || t >= actor.start + actor.duration {
                continue;
            }
            let progress = (t - actor.start) as f32 / actor.duration as f32;
            let cx = actor.from.0 + (actor.to.0 - actor.from.0) * progress;
            let cy = actor.from.1 + (actor.to.1 - actor.from.1) * progress;
            let bbox = BoundingBox::from_center(
                cx * width,
                cy * height,
                actor.size.0 * width,
                actor.size.1 * height,
            )
            .clamp_to(frame.width(), frame.height());
            detections.push(Detection::new(bbox, actor.class_id, 0.55 + jitter));
        }
        Ok(detections)
    }
}
