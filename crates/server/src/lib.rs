//! HTTP front end for the NEO hazard serving pipeline

pub mod api;
pub mod config;
