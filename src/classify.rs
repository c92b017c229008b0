//! Mapping of raw model class ids onto the entities this system reports.
//!
//! Only two ids are recognised: 0 (civilian) and 1 (soldier). Anything else
//! is dropped before rendering, counting, or identity tracking.

use image::Rgb;
use serde::Serialize;

use crate::detect::Detection;

/// A recognised entity class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Civilian,
    Soldier,
}

impl EntityClass {
    pub const ALL: [EntityClass; 2] = [EntityClass::Civilian, EntityClass::Soldier];
    pub const COUNT: usize = Self::ALL.len();

    /// Recognised class for a raw model id, or `None` to drop the detection.
    pub fn from_class_id(class_id: u32) -> Option<Self> {
        match class_id {
            0 => Some(EntityClass::Civilian),
            1 => Some(EntityClass::Soldier),
            _ => None,
        }
    }

    pub fn class_id(self) -> u32 {
        match self {
            EntityClass::Civilian => 0,
            EntityClass::Soldier => 1,
        }
    }

    /// Display label drawn on boxes.
    pub fn label(self) -> &'static str {
        match self {
            EntityClass::Civilian => "Civilian",
            EntityClass::Soldier => "Soldier",
        }
    }

    /// Stats key in JSON output.
    pub fn key(self) -> &'static str {
        match self {
            EntityClass::Civilian => "civilian",
            EntityClass::Soldier => "soldier",
        }
    }

    /// Box and label background color.
    pub fn color(self) -> Rgb<u8> {
        match self {
            EntityClass::Civilian => Rgb([0, 200, 0]),
            EntityClass::Soldier => Rgb([220, 0, 0]),
        }
    }

    /// Dense index for per-class arrays.
    pub fn index(self) -> usize {
        match self {
            EntityClass::Civilian => 0,
            EntityClass::Soldier => 1,
        }
    }
}

/// A detection whose class id is in the recognised set.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: Detection,
    pub class: EntityClass,
}

/// Keep recognised detections, tagging each with its class. Order is preserved.
pub fn classify(detections: Vec<Detection>) -> Vec<ClassifiedDetection> {
    detections
        .into_iter()
        .filter_map(|detection| {
            EntityClass::from_class_id(detection.class_id)
                .map(|class| ClassifiedDetection { detection, class })
        })
        .collect()
}
