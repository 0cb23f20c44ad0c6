//! Stagecast API Service
//!
//! Real-time session and turn orchestration for a conversational avatar
//! front end: viewer WebSocket sessions, the at-most-one-active-turn manager,
//! the lip-sync audio pipeline, a REST control plane for driving connected
//! avatars, and a transparent relay mode.

pub mod audio;
pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
