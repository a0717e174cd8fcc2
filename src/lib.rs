//! Library crate for courtside-live: reconciles push, poll and local score
//! updates of a live match into one monotonic timeline.

pub mod config;
pub mod dao;
/// Wire and payload types.
pub mod dto;
pub mod error;
/// Push channel, polling fallback, writes and session wiring.
pub mod services;
/// Reconciliation engine, its actor and the listener hub.
pub mod state;
