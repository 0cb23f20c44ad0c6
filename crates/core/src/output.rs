//! Shared output types attached to synthesized speech payloads.

use serde::{Deserialize, Serialize};

/// The text shown alongside one utterance, together with the speaking
/// character's identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisplayText {
    pub text: String,
    pub name: String,
    pub avatar: String,
}

impl DisplayText {
    pub fn new(text: impl Into<String>, name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: name.into(),
            avatar: avatar.into(),
        }
    }
}

/// Avatar directives derived from the response text, e.g. which expression
/// indices the front end should trigger while this utterance plays.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AvatarActions {
    pub expressions: Vec<i32>,
}
