//! Route handlers for the HTTP API.

pub mod admin;
pub mod events;
pub mod health;
pub mod jobs;
pub mod peer;
