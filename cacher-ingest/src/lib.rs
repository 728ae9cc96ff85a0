pub mod error;
pub mod pipeline;
pub mod upstream;

pub use error::IngestError;
pub use pipeline::{run_ingest, IngestConfig};
pub use upstream::UpstreamClient;
