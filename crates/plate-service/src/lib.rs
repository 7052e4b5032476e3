pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod filters;
pub mod localizer;
pub mod model_store;
pub mod normalizer;
pub mod pipeline;
pub mod state;

pub use config::PlateServiceConfig;
pub use pipeline::PlatePipeline;
pub use state::PlateServiceState;
