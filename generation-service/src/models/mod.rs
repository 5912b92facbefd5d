pub mod params;
pub mod request;

pub use params::{normalize, NormalizedParams, OUTPUT_SIZE};
pub use request::GenerateRequest;
