//! Stagecast Core Library
//!
//! Collaborator interfaces and shared types for the stagecast avatar server:
//! the agent/TTS/ASR engine traits, avatar expression extraction, sentence
//! segmentation, and the display/action types that ride along with synthesized
//! speech.

pub mod engine;
pub mod expression;
pub mod openai;
pub mod output;
pub mod segment;
