use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Male,
    Female,
    Neutral,
}

impl std::fmt::Display for VoiceGender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceGender::Male => write!(f, "male"),
            VoiceGender::Female => write!(f, "female"),
            VoiceGender::Neutral => write!(f, "neutral"),
        }
    }
}

/// A synthetic voice from the catalog. Read-only reference data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub gender: VoiceGender,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub suitable_for: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Gender {
    /// Whether a voice of `voice` gender is acceptable for this character.
    /// `Unknown` accepts anything.
    pub fn accepts(&self, voice: VoiceGender) -> bool {
        match self {
            Gender::Male => voice == VoiceGender::Male,
            Gender::Female => voice == VoiceGender::Female,
            Gender::Unknown => true,
        }
    }

    pub fn preferred_voice_gender(&self) -> Option<VoiceGender> {
        match self {
            Gender::Male => Some(VoiceGender::Male),
            Gender::Female => Some(VoiceGender::Female),
            Gender::Unknown => None,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Protagonist,
    Antagonist,
    Supporting,
    #[default]
    Minor,
    #[serde(other)]
    Other,
}

/// Where a character record came from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Planned,
    Declared,
    AutoCreated,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Character {
    pub id: String,
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

/// A character that has not been persisted yet, either declared upstream
/// or synthesised from an unmatched dialogue speaker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct NewCharacter {
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
}

impl From<&Character> for NewCharacter {
    fn from(c: &Character) -> Self {
        Self {
            name: c.name.clone(),
            gender: c.gender,
            role: c.role,
            description: c.description.clone(),
            age: c.age.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct DialogueEntry {
    pub speaker: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    /// Filled in once the speaker has been reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl DialogueEntry {
    /// Narrator lines and lines without a speaker.
    pub fn is_narration(&self) -> bool {
        self.speaker.trim().is_empty() || is_narrator_name(&self.speaker)
    }
}

pub fn is_narrator_name(speaker: &str) -> bool {
    let s = speaker.trim();
    s.eq_ignore_ascii_case("narrator") || s == "旁白"
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct StoryContext {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub setting: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
}

/// A persisted character -> voice binding, joined with the character name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VoiceBinding {
    pub session_id: String,
    pub character_id: String,
    pub character_name: String,
    pub voice_id: String,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// One proposed (character, voice) pair flowing through the repair passes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Candidate {
    pub character_name: String,
    pub voice_id: String,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    /// Raw proposer value when identifier resolution rewrote `voice_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_from: Option<String>,
    /// Previous voice id when a repair pass reassigned this candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reassigned_from: Option<String>,
}

/// Normalised lookup key for character and voice names.
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
