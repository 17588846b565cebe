//! Background tasks.
//!
//! # Tasks
//!
//! - `bucket_sweeper` - Drops idle rate-limit buckets

pub mod bucket_sweeper;

pub use bucket_sweeper::{start_bucket_sweeper, BucketSweeperConfig};
