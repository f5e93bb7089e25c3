//! Tensors, the backbone seam and checkpoints.

pub mod backbone;
pub mod checkpoint;
pub mod tensor;

pub use backbone::{Backbone, BackboneFactory, REPLICA_PREFIX, Replicated, replicate_in_place};
pub use checkpoint::{Checkpoint, MergeReport, load_strict, merge_intersecting};
pub use tensor::Tensor;
