//! Raw network outputs → detections.
//!
//! The network ends in an NMS head with the four-output contract
//! (count, boxes, scores, classes); everything past the reported count is
//! padding and must be dropped.

use crate::detection::{Detection, DetectionSet};

/// Decode staged NMS outputs, truncated to the engine-reported count.
///
/// The count is clamped to the staged capacity first so a corrupt value can
/// never read past the staging buffers.
pub fn decode_nms(
    reported: i64,
    boxes: &[f32],
    scores: &[f32],
    classes: &[i64],
    max_detections: usize,
) -> DetectionSet {
    let capacity = max_detections
        .min(boxes.len() / 4)
        .min(scores.len())
        .min(classes.len());
    let count = reported.clamp(0, capacity as i64) as usize;

    let mut set = DetectionSet::with_capacity(count);
    for index in 0..count {
        let corner = &boxes[index * 4..index * 4 + 4];
        set.push(Detection {
            bbox: [corner[0], corner[1], corner[2], corner[3]],
            score: scores[index],
            class_id: classes[index],
        });
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(n: usize) -> (Vec<f32>, Vec<f32>, Vec<i64>) {
        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        let mut classes = Vec::new();
        for i in 0..n {
            let base = i as f32 * 10.0;
            boxes.extend_from_slice(&[base, base, base + 5.0, base + 5.0]);
            scores.push(1.0 - i as f32 * 0.1);
            classes.push(i as i64 % 3);
        }
        (boxes, scores, classes)
    }

    #[test]
    fn truncates_to_reported_count() {
        let (boxes, scores, classes) = staged(10);
        let set = decode_nms(3, &boxes, &scores, &classes, 10);
        assert_eq!(set.len(), 3);
        assert_eq!(set.boxes[2], [20.0, 20.0, 25.0, 25.0]);
        assert_eq!(set.classes[2], 2);
    }

    #[test]
    fn zero_count_yields_empty_set() {
        let (boxes, scores, classes) = staged(10);
        assert!(decode_nms(0, &boxes, &scores, &classes, 10).is_empty());
    }

    #[test]
    fn corrupt_count_is_clamped_to_capacity() {
        let (boxes, scores, classes) = staged(4);
        let set = decode_nms(1_000, &boxes, &scores, &classes, 4);
        assert_eq!(set.len(), 4);
        let set = decode_nms(-7, &boxes, &scores, &classes, 4);
        assert!(set.is_empty());
    }

    #[test]
    fn shorter_staging_bounds_the_decode() {
        let (boxes, scores, mut classes) = staged(4);
        classes.truncate(2);
        let set = decode_nms(4, &boxes, &scores, &classes, 4);
        assert_eq!(set.len(), 2);
    }
}
