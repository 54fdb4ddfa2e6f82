//! Target selection.
//!
//! A pure pass over one frame's detections: confidence and class filters,
//! distance to the aim point measured from a vertically biased box center,
//! lock-radius cut, then nearest-wins with ties broken by input order.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::detection::DetectionSet;

/// Filters and geometry for target selection.
#[derive(Clone, Debug)]
pub struct SelectorConfig {
    /// Minimum confidence for a detection to be considered.
    pub confidence: f32,
    /// Class indices eligible for selection.
    pub hostile_classes: HashSet<i64>,
    /// Maximum distance from the aim point at which a detection may lock.
    pub lock_radius: f32,
    /// Fraction of box height the reference point is shifted toward the top
    /// edge, biasing selection to the upper target zone.
    pub head_bias: f32,
    /// Fixed reference coordinate; the capture region's geometric center.
    pub aim_point: (f32, f32),
}

/// The detection chosen for this control iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub center_x: f32,
    pub center_y: f32,
    /// Euclidean distance from the aim point.
    pub distance: f32,
    pub bbox: [f32; 4],
}

impl Target {
    /// Offset of the target from the aim point.
    pub fn offset_from(&self, aim_point: (f32, f32)) -> (f32, f32) {
        (self.center_x - aim_point.0, self.center_y - aim_point.1)
    }
}

/// Resolve hostile label names into a class-index set against the model's
/// label list. Unknown labels are a configuration error.
pub fn hostile_class_set(labels: &[String], hostile: &[String]) -> Result<HashSet<i64>> {
    let mut set = HashSet::with_capacity(hostile.len());
    for name in hostile {
        match labels.iter().position(|label| label == name) {
            Some(index) => {
                set.insert(index as i64);
            }
            None => bail!("hostile label {name:?} is not in the model label list"),
        }
    }
    Ok(set)
}

/// Pick at most one target from the frame's detections. Deterministic:
/// identical inputs and config always produce the identical result.
pub fn select(detections: &DetectionSet, config: &SelectorConfig) -> Option<Target> {
    let mut best: Option<Target> = None;

    for detection in detections.iter() {
        if detection.score < config.confidence {
            continue;
        }
        if !config.hostile_classes.contains(&detection.class_id) {
            continue;
        }

        let [x1, y1, x2, y2] = detection.bbox;
        let center_x = (x1 + x2) * 0.5;
        let center_y = (y1 + y2) * 0.5 - config.head_bias * (y2 - y1);
        let dx = center_x - config.aim_point.0;
        let dy = center_y - config.aim_point.1;
        let distance = dx.hypot(dy);

        if distance >= config.lock_radius {
            continue;
        }
        // Strict `<` keeps the earliest detection on ties.
        if best.map_or(true, |current| distance < current.distance) {
            best = Some(Target {
                center_x,
                center_y,
                distance,
                bbox: detection.bbox,
            });
        }
    }

    best
}
