// Network-backed and in-process collaborators of the pipeline

pub mod http;
pub mod memory;

pub use http::{base_url, HttpAuthorizationService, HttpDomainService, HttpEventEmitter, HttpResourceFetch};
pub use memory::MemoryCache;
