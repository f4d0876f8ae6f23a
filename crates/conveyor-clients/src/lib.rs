//! Concrete HTTP/S3 implementations of the `conveyor-core` collaborator
//! traits (C2 object store, C3 extraction API). Grounded on
//! `decision-gate-mcp::runpack_object_store` for the S3 client shape — the
//! teacher itself never talks to S3 — and on the teacher's own `reqwest`
//! usage for the extraction API adapter.

mod extraction_api;
mod s3_store;

pub use extraction_api::HttpExtractionApiClient;
pub use s3_store::S3ObjectStore;
