//! Detection results and tensor binding metadata.

use anyhow::{bail, Result};

/// Single detection in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Corner box: x1, y1, x2, y2.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

/// All detections produced by one inference call, in engine output order.
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub classes: Vec<i64>,
}

impl DetectionSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            boxes: Vec::with_capacity(capacity),
            scores: Vec::with_capacity(capacity),
            classes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn push(&mut self, detection: Detection) {
        self.boxes.push(detection.bbox);
        self.scores.push(detection.score);
        self.classes.push(detection.class_id);
    }

    pub fn get(&self, index: usize) -> Option<Detection> {
        Some(Detection {
            bbox: *self.boxes.get(index)?,
            score: *self.scores.get(index)?,
            class_id: *self.classes.get(index)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

/// Direction of a bound tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorDirection {
    Input,
    Output,
}

/// Element type of a bound tensor, limited to what the network contract
/// actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorElem {
    F32,
    I32,
    I64,
}

impl TensorElem {
    pub fn size_of(self) -> usize {
        match self {
            TensorElem::F32 | TensorElem::I32 => 4,
            TensorElem::I64 => 8,
        }
    }

    pub fn from_ort(ty: ort::TensorElementType) -> Result<Self> {
        match ty {
            ort::TensorElementType::Float32 => Ok(TensorElem::F32),
            ort::TensorElementType::Int32 => Ok(TensorElem::I32),
            ort::TensorElementType::Int64 => Ok(TensorElem::I64),
            other => bail!("unsupported tensor element type {other:?}"),
        }
    }
}

/// One I/O tensor of the loaded network, with its shape resolved against the
/// expected input resolution. Established once at bind time and reused for
/// every inference call.
#[derive(Debug, Clone)]
pub struct TensorBinding {
    pub name: String,
    pub shape: Vec<usize>,
    pub elem: TensorElem,
    pub byte_len: usize,
    pub direction: TensorDirection,
}

impl TensorBinding {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_set_round_trips_pushes() {
        let mut set = DetectionSet::with_capacity(2);
        set.push(Detection {
            bbox: [1.0, 2.0, 3.0, 4.0],
            score: 0.9,
            class_id: 1,
        });
        set.push(Detection {
            bbox: [5.0, 6.0, 7.0, 8.0],
            score: 0.4,
            class_id: 0,
        });

        assert_eq!(set.len(), 2);
        let second = set.get(1).unwrap();
        assert_eq!(second.class_id, 0);
        assert_eq!(set.iter().count(), 2);
        assert!(set.get(2).is_none());
    }

    #[test]
    fn binding_byte_math() {
        let binding = TensorBinding {
            name: "det_boxes".into(),
            shape: vec![1, 100, 4],
            elem: TensorElem::F32,
            byte_len: 400 * 4,
            direction: TensorDirection::Output,
        };
        assert_eq!(binding.element_count(), 400);
        assert_eq!(binding.element_count() * binding.elem.size_of(), 1600);
        assert_eq!(TensorElem::I64.size_of(), 8);
    }
}
