//! Blob storage access and parquet loading.

mod frame;
mod store;

#[cfg(test)]
pub(crate) use frame::test_support;

pub use frame::Frame;
pub use store::{
    content_digest, content_hash, create_bucket_store, ensure_bucket, get_bytes, list_keys, parse_s3_uri,
    put_bytes,
};
