//! Core engine modules
//!
//! Staging-buffer readback shared by the translator, picker and terrain pipeline.

pub mod async_readback;
