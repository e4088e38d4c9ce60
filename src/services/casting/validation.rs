use crate::core::error::{CastingError, Violation};
use crate::core::state::{name_key, Candidate, Character};
use crate::services::catalog::{ExclusionSet, VoiceCatalog};
use log::warn;
use std::collections::{HashMap, HashSet};

/// Evaluates every rule against the repaired candidates. Nothing
/// short-circuits, so the result lists every violation at once.
pub fn collect_violations(
    candidates: &[Candidate],
    characters: &[Character],
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
    strict_gender: bool,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if candidates.len() != characters.len() {
        violations.push(Violation::CountMismatch {
            expected: characters.len(),
            actual: candidates.len(),
        });
    }

    let mut by_voice: Vec<(&str, Vec<String>)> = Vec::new();
    for c in candidates.iter().filter(|c| !c.voice_id.is_empty()) {
        match by_voice.iter_mut().find(|(id, _)| *id == c.voice_id) {
            Some((_, names)) => names.push(c.character_name.clone()),
            None => by_voice.push((c.voice_id.as_str(), vec![c.character_name.clone()])),
        }
    }
    for (voice_id, names) in by_voice.into_iter().filter(|(_, n)| n.len() > 1) {
        violations.push(Violation::DuplicateVoice {
            voice_id: voice_id.to_string(),
            characters: names,
        });
    }

    let requested: HashMap<String, &Character> =
        characters.iter().map(|c| (name_key(&c.name), c)).collect();
    let mut covered = HashSet::new();

    for c in candidates {
        if exclusions.is_narrator(&c.voice_id) {
            violations.push(Violation::NarratorVoice {
                character: c.character_name.clone(),
            });
        } else if exclusions.is_used(&c.voice_id) {
            violations.push(Violation::AlreadyBound {
                character: c.character_name.clone(),
                voice_id: c.voice_id.clone(),
            });
        }

        let voice = catalog.get(&c.voice_id);
        if voice.is_none() {
            violations.push(Violation::UnknownVoice {
                character: c.character_name.clone(),
                voice_id: c.voice_id.clone(),
            });
        }

        let key = name_key(&c.character_name);
        let Some(character) = requested.get(&key) else {
            violations.push(Violation::UnknownCharacter {
                character: c.character_name.clone(),
            });
            continue;
        };
        covered.insert(key);

        if let Some(voice) = voice {
            if !character.gender.accepts(voice.gender) {
                let mismatch = Violation::GenderMismatch {
                    character: character.name.clone(),
                    character_gender: character.gender,
                    voice_id: voice.id.clone(),
                    voice_gender: voice.gender,
                };
                if strict_gender {
                    violations.push(mismatch);
                } else {
                    warn!("Accepting gender mismatch: {}", mismatch);
                }
            }
        }
    }

    for character in characters {
        if !covered.contains(&name_key(&character.name)) {
            violations.push(Violation::MissingCharacter {
                character: character.name.clone(),
            });
        }
    }

    violations
}

pub fn validate(
    candidates: &[Candidate],
    characters: &[Character],
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
    strict_gender: bool,
) -> Result<(), CastingError> {
    let violations = collect_violations(candidates, characters, catalog, exclusions, strict_gender);
    if violations.is_empty() {
        Ok(())
    } else {
        for v in &violations {
            warn!("Validation: {}", v);
        }
        Err(CastingError::Validation(violations))
    }
}
