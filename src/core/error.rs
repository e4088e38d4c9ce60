use crate::core::state::{Gender, VoiceGender};
use thiserror::Error;

/// A single Validation Gate rule that failed after repair.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    CountMismatch { expected: usize, actual: usize },
    DuplicateVoice { voice_id: String, characters: Vec<String> },
    NarratorVoice { character: String },
    UnknownVoice { character: String, voice_id: String },
    AlreadyBound { character: String, voice_id: String },
    GenderMismatch {
        character: String,
        character_gender: Gender,
        voice_id: String,
        voice_gender: VoiceGender,
    },
    UnknownCharacter { character: String },
    MissingCharacter { character: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::CountMismatch { expected, actual } => {
                write!(f, "expected {} assignment(s), got {}", expected, actual)
            }
            Violation::DuplicateVoice { voice_id, characters } => write!(
                f,
                "voice '{}' assigned to multiple characters: {}",
                voice_id,
                characters.join(", ")
            ),
            Violation::NarratorVoice { character } => {
                write!(f, "'{}' was assigned the narrator voice", character)
            }
            Violation::UnknownVoice { character, voice_id } => write!(
                f,
                "'{}' was assigned unknown voice '{}'",
                character, voice_id
            ),
            Violation::AlreadyBound { character, voice_id } => write!(
                f,
                "'{}' was assigned voice '{}' which is already bound in this session",
                character, voice_id
            ),
            Violation::GenderMismatch {
                character,
                character_gender,
                voice_id,
                voice_gender,
            } => write!(
                f,
                "'{}' is {} but voice '{}' is {}",
                character, character_gender, voice_id, voice_gender
            ),
            Violation::UnknownCharacter { character } => {
                write!(f, "assignment for unrequested character '{}'", character)
            }
            Violation::MissingCharacter { character } => {
                write!(f, "no assignment for character '{}'", character)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CastingError {
    #[error(
        "not enough voices: {female_needed} female character(s) for {female_available} female voice(s), \
         {male_needed} male/unknown character(s) for {male_available} male voice(s)"
    )]
    Capacity {
        female_needed: usize,
        female_available: usize,
        male_needed: usize,
        male_available: usize,
    },

    #[error("casting proposer failed: {0}")]
    Proposer(String),

    #[error("voice assignment rejected: {}", join_violations(.0))]
    Validation(Vec<Violation>),

    #[error("no voice bound for speaker(s): {}", .0.join(", "))]
    Coverage(Vec<String>),

    #[error("assignment store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
