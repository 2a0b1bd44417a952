//! HTTP request handlers organized by route

pub mod error;
pub mod health;
pub mod info;
pub mod progress;
pub mod stream;

pub use error::ApiError;
pub use health::{HealthResponse, health};
pub use info::{FileInfo, InfoResponse, info};
pub use progress::report_progress;
pub use stream::{stream_default_file, stream_file};
