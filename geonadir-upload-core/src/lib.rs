#![doc = "geonadir-upload-core: resumable bulk upload engine for Geonadir datasets."]

//! This crate contains the engine behind the `geonadir-upload` CLI:
//! source enumeration, filename reconciliation, remote index walking,
//! per-dataset upload jobs and the batch coordinator.
//! Transport lives behind the traits in [`contract`].
//!
//! # Usage
//! Build a [`job::UploadContext`] around implementations of
//! [`contract::DatasetApi`] and [`contract::AssetFetcher`], then hand a list
//! of [`job::DatasetSpec`]s to [`batch::run_batch`].

pub mod batch;
pub mod catalog;
pub mod config;
pub mod contract;
pub mod error;
pub mod job;
pub mod naming;
pub mod remote_index;
pub mod report;
pub mod source;

pub use error::UploadError;
