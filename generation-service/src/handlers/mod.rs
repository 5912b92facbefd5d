//! HTTP handlers for the generation service.

pub mod generate;
pub mod health;
