//! Content-addressed render cache for LaTeX document templates.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
