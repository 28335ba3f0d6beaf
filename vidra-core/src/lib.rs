//! # Vidra Core
//!
//! The job-dispatch and worker-coordination fabric shared by the Vidra
//! producer and worker binaries:
//!
//! - **Broker**: durable per-subject work streams with consumer groups,
//!   explicit ack/nak, redelivery, and dead-letter routing, plus a
//!   non-durable pub/sub channel for progress events. Backed by Redis
//!   Streams.
//! - **Storage**: the object-store port (multipart upload, presigned
//!   URLs, prefix listing/deletion) and its S3 implementation.
//! - **Repository**: the `video` row lifecycle against Postgres.
//! - **Pipeline**: source staging, probing, multi-quality HLS encoding,
//!   master playlist, thumbnail, and the classified gallery.
//! - **Upload**: direct-upload (multipart) coordination.
//! - **Disk**: scratch-partition monitoring and back-pressure.
#![allow(missing_docs)]

pub mod broker;
pub mod disk;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod repo;
pub mod storage;
pub mod upload;

pub use broker::{Delivery, JobBroker, JobConsumer, RedisBroker, subjects};
pub use error::{CoreError, JobError, Result};
pub use repo::{PgVideoRepository, VideoRepository};
pub use storage::{ObjectStore, S3Store};
