//! Object storage for LugaAI media.
//!
//! This crate provides:
//! - The `ObjectStore` trait with S3-compatible (Baidu BOS) and Cloudinary backends
//! - Backend selection from `S3_PROVIDER`
//! - Upload validation and object key layout

pub mod cloudinary;
pub mod error;
pub mod s3;
pub mod store;
pub mod validation;

pub use cloudinary::{CloudinaryConfig, CloudinaryStore};
pub use error::{StorageError, StorageResult};
pub use s3::{S3Config, S3Store};
pub use store::{store_from_env, ObjectStore, StorageConfig};
pub use validation::{content_type_for, object_key, validate_upload, MAX_UPLOAD_BYTES};
