//! Pretrained weights: registry lookup, downloads and the weight lifecycle.

pub mod download;
pub mod registry;
pub mod weights;

pub use download::{HttpFetcher, WeightFetcher};
pub use registry::{StaticRegistry, WeightRegistry, cache_file_name};
pub use weights::{StartMode, WeightLifecycleManager, WeightSettings};
