//! Detection engine lifecycle: `load → bind_io → infer* → close`.
//!
//! The engine wraps an ONNX Runtime session around the precompiled network
//! blob. Binding happens once: every I/O tensor's shape is resolved against
//! the expected input resolution, validated against the NMS head contract
//! (count, boxes, scores, classes), and backed by host staging buffers that
//! are allocated up front and reused for every call. `close` releases the
//! session and staging exactly once; `Drop` routes through the same path.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session, ValueType};
use tracing::debug;

use screen_ingest::Frame;

use crate::{
    detection::{DetectionSet, TensorBinding, TensorDirection, TensorElem},
    postprocess, preprocess,
};

/// Output tensor order of the NMS head.
const OUT_COUNT: usize = 0;
const OUT_BOXES: usize = 1;
const OUT_SCORES: usize = 2;
const OUT_CLASSES: usize = 3;

/// Where to find the network blob and what resolution it expects.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    /// Fixed resolution dynamic input dimensions resolve against.
    pub input_width: u32,
    pub input_height: u32,
    pub intra_threads: usize,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>, input_width: u32, input_height: u32) -> Self {
        Self {
            model_path: model_path.into(),
            input_width,
            input_height,
            intra_threads: 4,
        }
    }
}

/// I/O established by `bind_io` and reused across calls.
struct EngineIo {
    input: TensorBinding,
    outputs: Vec<TensorBinding>,
    max_detections: usize,
    /// Host input staging, shape `[1, 3, h, w]`.
    host_input: Array4<f32>,
    staged_count: Vec<i64>,
    staged_boxes: Vec<f32>,
    staged_scores: Vec<f32>,
    staged_classes: Vec<i64>,
}

/// Owns the loaded network and all of its I/O resources.
///
/// `infer` takes `&mut self`, so two inference calls can never overlap on
/// one instance; callers serialize through the orchestrator.
pub struct DetectionEngine {
    expected: (u32, u32),
    session: Option<Session>,
    io: Option<EngineIo>,
}

impl DetectionEngine {
    /// Deserialize the precompiled network description and build the
    /// execution session. A failure here is fatal to pipeline startup.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads.max(1))?;
        #[cfg(feature = "cuda")]
        let builder = builder.with_execution_providers([
            ort::CUDAExecutionProvider::default().build(),
        ])?;

        let session = builder
            .commit_from_file(&config.model_path)
            .with_context(|| {
                format!(
                    "failed to load network description from {}",
                    config.model_path.display()
                )
            })?;
        debug!(model = %config.model_path.display(), "network description loaded");

        Ok(Self {
            expected: (config.input_width, config.input_height),
            session: Some(session),
            io: None,
        })
    }

    /// Resolve and validate every I/O tensor and pre-allocate the host
    /// staging buffers. Must be called exactly once after `load`.
    pub fn bind_io(&mut self) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("detection engine is closed"))?;
        if self.io.is_some() {
            bail!("engine I/O is already bound");
        }

        let (expected_w, expected_h) = self.expected;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("network declares no input tensor"))?;
        let input = bind_tensor(
            &input_meta.name,
            &input_meta.input_type,
            TensorDirection::Input,
            expected_w,
            expected_h,
        )?;
        if input.shape.len() != 4 {
            bail!("input tensor must be NCHW, got shape {:?}", input.shape);
        }
        if input.shape[2] != expected_h as usize || input.shape[3] != expected_w as usize {
            bail!(
                "network input {}x{} does not match expected resolution {expected_w}x{expected_h}",
                input.shape[3],
                input.shape[2]
            );
        }

        if session.outputs.len() != 4 {
            bail!(
                "network must expose the 4-output NMS head, found {} outputs",
                session.outputs.len()
            );
        }
        let mut outputs = Vec::with_capacity(4);
        for meta in &session.outputs {
            outputs.push(bind_tensor(
                &meta.name,
                &meta.output_type,
                TensorDirection::Output,
                expected_w,
                expected_h,
            )?);
        }

        let boxes = &outputs[OUT_BOXES];
        if boxes.shape.last() != Some(&4) {
            bail!(
                "box output {} must end in 4 coordinates, got shape {:?}",
                boxes.name,
                boxes.shape
            );
        }
        let max_detections = boxes.element_count() / 4;
        for (index, expected_len) in [(OUT_SCORES, max_detections), (OUT_CLASSES, max_detections)] {
            let binding = &outputs[index];
            if binding.element_count() != expected_len {
                bail!(
                    "output {} holds {} elements, expected {expected_len}",
                    binding.name,
                    binding.element_count()
                );
            }
        }

        for binding in std::iter::once(&input).chain(outputs.iter()) {
            debug!(
                name = %binding.name,
                shape = ?binding.shape,
                bytes = binding.byte_len,
                "tensor bound"
            );
        }

        self.io = Some(EngineIo {
            host_input: Array4::<f32>::zeros((1, 3, expected_h as usize, expected_w as usize)),
            staged_count: Vec::with_capacity(outputs[OUT_COUNT].element_count()),
            staged_boxes: Vec::with_capacity(max_detections * 4),
            staged_scores: Vec::with_capacity(max_detections),
            staged_classes: Vec::with_capacity(max_detections),
            max_detections,
            input,
            outputs,
        });
        Ok(())
    }

    /// One inference call: preprocess into the bound input staging, execute
    /// the session (a single bounded host↔device round trip inside the
    /// runtime), restage every output, and decode the detection set.
    pub fn infer(&mut self, frame: &Frame) -> Result<DetectionSet> {
        let Self { session, io, .. } = self;
        let session = session
            .as_ref()
            .ok_or_else(|| anyhow!("detection engine is closed"))?;
        let io = io
            .as_mut()
            .ok_or_else(|| anyhow!("engine I/O is not bound"))?;

        preprocess::frame_to_chw(frame, &mut io.host_input)
            .context("frame preprocessing failed")?;

        let outputs = session
            .run(ort::inputs![io.input.name.as_str() => io.host_input.view()]?)
            .context("network execution failed")?;

        // Stage every output; each buffer is cleared first so nothing from a
        // previous call can survive into this result.
        {
            let binding = &io.outputs[OUT_COUNT];
            stage_ints(&outputs[binding.name.as_str()], binding, &mut io.staged_count)?;
        }
        {
            let binding = &io.outputs[OUT_BOXES];
            stage_floats(&outputs[binding.name.as_str()], binding, &mut io.staged_boxes)?;
        }
        {
            let binding = &io.outputs[OUT_SCORES];
            stage_floats(&outputs[binding.name.as_str()], binding, &mut io.staged_scores)?;
        }
        {
            let binding = &io.outputs[OUT_CLASSES];
            stage_ints(&outputs[binding.name.as_str()], binding, &mut io.staged_classes)?;
        }
        drop(outputs);

        let reported = io.staged_count.first().copied().unwrap_or(0);
        Ok(postprocess::decode_nms(
            reported,
            &io.staged_boxes,
            &io.staged_scores,
            &io.staged_classes,
            io.max_detections,
        ))
    }

    /// The binding table established by `bind_io`: input first, then the
    /// four outputs in declared order.
    pub fn bindings(&self) -> Vec<&TensorBinding> {
        match &self.io {
            Some(io) => std::iter::once(&io.input).chain(io.outputs.iter()).collect(),
            None => Vec::new(),
        }
    }

    pub fn max_detections(&self) -> usize {
        self.io.as_ref().map_or(0, |io| io.max_detections)
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.expected
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Tear the engine down. Consuming the instance makes use-after-close
    /// unrepresentable; the shared path with `Drop` keeps the release
    /// exactly-once.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        // `run` is synchronous and `infer` takes `&mut self`, so no call can
        // be in flight here. Staging goes first, then the session releases
        // the execution context and loaded network.
        if self.io.take().is_some() {
            debug!("engine staging buffers released");
        }
        if self.session.take().is_some() {
            debug!("engine session released");
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build the binding for one declared tensor, resolving dynamic dimensions
/// against the expected input resolution the way the runtime will see them.
fn bind_tensor(
    name: &str,
    value_type: &ValueType,
    direction: TensorDirection,
    expected_w: u32,
    expected_h: u32,
) -> Result<TensorBinding> {
    let ValueType::Tensor { ty, dimensions } = value_type else {
        bail!("tensor {name} has non-tensor type {value_type:?}");
    };
    let elem = TensorElem::from_ort(*ty)
        .with_context(|| format!("tensor {name} has an unsupported element type"))?;
    let shape = resolve_dims(dimensions, direction, expected_w, expected_h)
        .with_context(|| format!("cannot resolve shape of tensor {name}"))?;
    let byte_len = shape.iter().product::<usize>() * elem.size_of();
    Ok(TensorBinding {
        name: name.to_string(),
        shape,
        elem,
        byte_len,
        direction,
    })
}

/// Resolve declared dimensions into concrete ones. Dynamic input dims take
/// the fixed expected resolution (batch 1, 3 channels); outputs must be
/// fully static, since staging is sized from them once.
fn resolve_dims(
    dimensions: &[i64],
    direction: TensorDirection,
    expected_w: u32,
    expected_h: u32,
) -> Result<Vec<usize>> {
    match direction {
        TensorDirection::Input => {
            if dimensions.len() != 4 {
                bail!("input must have 4 dimensions, got {dimensions:?}");
            }
            let defaults = [1, 3, i64::from(expected_h), i64::from(expected_w)];
            Ok(dimensions
                .iter()
                .zip(defaults)
                .map(|(&dim, default)| if dim > 0 { dim as usize } else { default as usize })
                .collect())
        }
        TensorDirection::Output => {
            if dimensions.iter().any(|&dim| dim <= 0) {
                bail!("output dimensions must be static, got {dimensions:?}");
            }
            Ok(dimensions.iter().map(|&dim| dim as usize).collect())
        }
    }
}

/// Copy a float output into its staging buffer, replacing prior contents.
fn stage_floats(
    value: &ort::Value,
    binding: &TensorBinding,
    staging: &mut Vec<f32>,
) -> Result<()> {
    staging.clear();
    match binding.elem {
        TensorElem::F32 => {
            let view = value
                .try_extract_tensor::<f32>()
                .with_context(|| format!("output {} is not f32", binding.name))?;
            staging.extend(view.iter().copied());
        }
        other => bail!("output {} has element type {other:?}, expected f32", binding.name),
    }
    Ok(())
}

/// Copy an integer output into its staging buffer, widening to i64. Some
/// exports emit float counts/classes; those are accepted and truncated.
fn stage_ints(value: &ort::Value, binding: &TensorBinding, staging: &mut Vec<i64>) -> Result<()> {
    staging.clear();
    match binding.elem {
        TensorElem::I64 => {
            let view = value
                .try_extract_tensor::<i64>()
                .with_context(|| format!("output {} is not i64", binding.name))?;
            staging.extend(view.iter().copied());
        }
        TensorElem::I32 => {
            let view = value
                .try_extract_tensor::<i32>()
                .with_context(|| format!("output {} is not i32", binding.name))?;
            staging.extend(view.iter().map(|&v| i64::from(v)));
        }
        TensorElem::F32 => {
            let view = value
                .try_extract_tensor::<f32>()
                .with_context(|| format!("output {} is not f32", binding.name))?;
            staging.extend(view.iter().map(|&v| v as i64));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_input_dims_resolve_to_expected_resolution() {
        let shape =
            resolve_dims(&[-1, -1, -1, -1], TensorDirection::Input, 640, 640).unwrap();
        assert_eq!(shape, vec![1, 3, 640, 640]);
    }

    #[test]
    fn static_input_dims_pass_through() {
        let shape = resolve_dims(&[1, 3, 416, 416], TensorDirection::Input, 640, 640).unwrap();
        assert_eq!(shape, vec![1, 3, 416, 416]);
    }

    #[test]
    fn non_nchw_input_is_rejected() {
        assert!(resolve_dims(&[3, 640, 640], TensorDirection::Input, 640, 640).is_err());
    }

    #[test]
    fn dynamic_output_dims_are_rejected() {
        assert!(resolve_dims(&[1, -1, 4], TensorDirection::Output, 640, 640).is_err());
        let shape = resolve_dims(&[1, 100, 4], TensorDirection::Output, 640, 640).unwrap();
        assert_eq!(shape, vec![1, 100, 4]);
    }

    #[test]
    fn missing_blob_fails_load() {
        let config = EngineConfig::new("does/not/exist.onnx", 640, 640);
        assert!(DetectionEngine::load(&config).is_err());
    }
}
