//! HTTP route handlers

pub mod attempts;
pub mod sessions;
