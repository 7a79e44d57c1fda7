#![forbid(unsafe_code)]

//! Shared building blocks for the Flexiyo edge binaries.

pub mod config;
pub mod github;
pub mod security;
pub mod seo;
pub mod sitemap;
pub mod track;
pub mod ytmusic;
