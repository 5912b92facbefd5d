pub mod fetcher;
pub mod image;
pub mod pipeline;
pub mod providers;

pub use fetcher::ArtifactFetcher;
pub use image::{decode_source_image, ImageFile};
pub use pipeline::{build_prompt, GenerationPipeline};
