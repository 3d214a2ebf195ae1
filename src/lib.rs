// Library exports for emerald
pub mod annotation;
pub mod artifacts;
pub mod classify;
pub mod clusters;
pub mod error;
pub mod gff;
pub mod input;
pub mod matrix;
pub mod params;
pub mod pipeline;
pub mod predict;
pub mod preprocess;
pub mod registry;

pub use error::EmeraldError;
pub use params::DetectionParams;
pub use pipeline::{Detection, InputFiles, Pipeline};
