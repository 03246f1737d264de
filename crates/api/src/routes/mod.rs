//! HTTP routes

pub mod alerts;
