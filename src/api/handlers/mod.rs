//! API handlers for Parley.

pub mod auth;
pub mod health;
pub mod root;
