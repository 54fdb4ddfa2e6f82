//! Neural detection over the precompiled network blob, plus the pure target
//! selector that reduces a frame's detections to at most one target.
//!
//! The engine owns its session and staging for its whole lifecycle
//! (`load → bind_io → infer* → close`); selection is a stateless pass over
//! the resulting [`DetectionSet`].

pub mod detection;
pub mod engine;
pub mod postprocess;
pub mod preprocess;
pub mod selector;

pub use detection::{Detection, DetectionSet, TensorBinding, TensorDirection, TensorElem};
pub use engine::{DetectionEngine, EngineConfig};
pub use selector::{hostile_class_set, select, SelectorConfig, Target};
