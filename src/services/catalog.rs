use crate::core::io::{read_document, Storage};
use crate::core::state::{name_key, Voice, VoiceGender};
use anyhow::{bail, Result};
use log::info;
use std::collections::HashSet;

/// Voice ids unavailable to a casting attempt: the session narrator plus
/// every voice already bound in the session.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    narrator: String,
    used: HashSet<String>,
}

impl ExclusionSet {
    pub fn new(narrator: impl Into<String>) -> Self {
        Self {
            narrator: narrator.into(),
            used: HashSet::new(),
        }
    }

    pub fn with_used<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.used.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn narrator(&self) -> &str {
        &self.narrator
    }

    pub fn is_narrator(&self, voice_id: &str) -> bool {
        self.narrator == voice_id
    }

    /// Bound earlier in the session (narrator not included).
    pub fn is_used(&self, voice_id: &str) -> bool {
        self.used.contains(voice_id)
    }

    pub fn is_excluded(&self, voice_id: &str) -> bool {
        self.is_narrator(voice_id) || self.is_used(voice_id)
    }
}

#[derive(Debug, Default)]
pub struct GenderPartition<'a> {
    pub male: Vec<&'a Voice>,
    pub female: Vec<&'a Voice>,
    pub neutral: Vec<&'a Voice>,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Result<Self> {
        let mut seen = HashSet::new();
        for v in &voices {
            if v.id.trim().is_empty() {
                bail!("Voice '{}' has an empty id", v.name);
            }
            if !seen.insert(v.id.as_str()) {
                bail!("Duplicate voice id in catalog: {}", v.id);
            }
        }
        Ok(Self { voices })
    }

    pub async fn load(storage: &dyn Storage, path: &str) -> Result<Self> {
        let voices: Vec<Voice> = read_document(storage, path).await?;
        info!("Loaded {} voices from {}", voices.len(), path);
        Self::new(voices)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Voice> {
        let key = name_key(name);
        if key.is_empty() {
            return None;
        }
        self.voices.iter().find(|v| name_key(&v.name) == key)
    }

    /// Voices a casting attempt may use, in catalog order.
    pub fn available<'a>(
        &'a self,
        exclusions: &'a ExclusionSet,
    ) -> impl Iterator<Item = &'a Voice> + 'a {
        self.voices.iter().filter(move |v| !exclusions.is_excluded(&v.id))
    }

    pub fn partition_by_gender(&self, exclusions: &ExclusionSet) -> GenderPartition<'_> {
        let mut partition = GenderPartition::default();
        for v in self.voices.iter().filter(|v| !exclusions.is_excluded(&v.id)) {
            match v.gender {
                VoiceGender::Male => partition.male.push(v),
                VoiceGender::Female => partition.female.push(v),
                VoiceGender::Neutral => partition.neutral.push(v),
            }
        }
        partition
    }
}

#[cfg(test)]
pub(crate) fn voice(id: &str, name: &str, gender: VoiceGender) -> Voice {
    Voice {
        id: id.to_string(),
        name: name.to_string(),
        gender,
        style: None,
        category: None,
        suitable_for: Vec::new(),
    }
}
