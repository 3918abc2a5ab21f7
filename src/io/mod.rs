mod blob_store;
pub mod layout;
mod local_store;
mod memory_store;
mod s3_store;

pub use blob_store::BlobStore;
pub use local_store::LocalBlobStore;
pub use memory_store::MemoryBlobStore;
pub use s3_store::{create_s3_client, S3BlobStore};
