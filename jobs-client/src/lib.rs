mod client;
mod error;
pub mod types;

pub use client::JobsClient;
pub use error::ApiError;
pub use types::Job;
pub use types::JobId;
pub use types::JobListing;
pub use types::JobMetadata;
pub use types::Stats;
