//! HTTP prediction service for the apple fruit and apple leaf disease
//! classifiers.

pub mod config;
pub mod error;
pub mod keras_config;
pub mod labels;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod routes;
pub mod state;
pub mod utils;

pub use config::ServiceConfig;
pub use routes::create_router;
pub use state::AppState;
