//! Quip remote directory.
//!
//! This module provides a `RemoteDirectory` backed by Quip's REST API with:
//! - Bearer-token authentication
//! - Folder listings tagged by `folder_id` / `thread_id`
//! - Streamed DOCX exports
//! - Folder URL parsing for user input

pub mod client;
pub mod folder_url;

pub use client::{QuipClient, QuipConfig, DEFAULT_API_BASE};
pub use folder_url::extract_folder_id;
