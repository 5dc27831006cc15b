pub mod http;
pub mod pipeline;
pub mod store;

pub use http::HttpObjectStore;
pub use pipeline::{destination_key, RetryPolicy, UploadPipeline, UploadReceipt};
pub use store::ObjectStore;
