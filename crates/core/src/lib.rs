//! Core library: projects, media listing, sidecar captions, thumbnails,
//! caption generation, media editing and export.

pub mod captioner;
pub mod config;
pub mod editor;
pub mod error;
pub mod export;
pub mod ffmpeg;
pub mod fsutil;
pub mod models;
pub mod pipeline;
pub mod project;
pub mod scanner;
pub mod sidecar;
pub mod thumbnail;
