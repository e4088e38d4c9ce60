//! Deterministic passes that fix recoverable proposer mistakes.
//!
//! Each pass consumes the candidate list and returns a new one. Passes
//! always run in the order of [`run_repairs`]: identifier resolution,
//! duplicate repair, narrator-conflict repair. Anything a pass cannot fix
//! is left in place for the validation gate to reject.

use crate::core::state::{Candidate, Voice, VoiceGender};
use crate::services::catalog::{ExclusionSet, VoiceCatalog};
use log::{debug, warn};
use std::collections::HashSet;

pub fn run_repairs(
    candidates: Vec<Candidate>,
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
) -> Vec<Candidate> {
    let candidates = resolve_identifiers(candidates, catalog);
    let candidates = repair_duplicates(candidates, catalog, exclusions);
    repair_narrator_conflicts(candidates, catalog, exclusions)
}

/// Maps a proposer voice reference onto a catalog id.
///
/// Tries, in order: the value as an id, a trailing `(id)` token, the whole
/// value as a display name, then the text before `(` as a display name.
pub fn resolve_voice_reference(raw: &str, catalog: &VoiceCatalog) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if catalog.contains(raw) {
        return Some(raw.to_string());
    }

    if let Some(token) = trailing_parenthesized(raw) {
        if catalog.contains(token) {
            return Some(token.to_string());
        }
    }

    if let Some(v) = catalog.find_by_name(raw) {
        return Some(v.id.clone());
    }

    let prefix = raw.split('(').next().unwrap_or_default().trim();
    if !prefix.is_empty() && prefix.len() < raw.len() {
        if let Some(v) = catalog.find_by_name(prefix) {
            return Some(v.id.clone());
        }
    }

    None
}

fn trailing_parenthesized(raw: &str) -> Option<&str> {
    let inner = raw.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let token = inner[open + 1..].trim();
    (!token.is_empty()).then_some(token)
}

pub fn resolve_identifiers(candidates: Vec<Candidate>, catalog: &VoiceCatalog) -> Vec<Candidate> {
    candidates
        .into_iter()
        .map(|mut c| {
            if catalog.contains(&c.voice_id) {
                return c;
            }
            match resolve_voice_reference(&c.voice_id, catalog) {
                Some(id) => {
                    warn!(
                        "Resolved voice reference '{}' to '{}' for {}",
                        c.voice_id, id, c.character_name
                    );
                    if let Some(v) = catalog.get(&id) {
                        c.voice_name = Some(v.name.clone());
                    }
                    c.resolved_from = Some(std::mem::replace(&mut c.voice_id, id));
                    c
                }
                None => {
                    debug!(
                        "Could not resolve voice reference '{}' for {}",
                        c.voice_id, c.character_name
                    );
                    c
                }
            }
        })
        .collect()
}

/// Reassigns every candidate whose voice repeats an earlier candidate's, or
/// a voice bound earlier in the session.
pub fn repair_duplicates(
    candidates: Vec<Candidate>,
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
) -> Vec<Candidate> {
    let mut taken: HashSet<String> = candidates.iter().map(|c| c.voice_id.clone()).collect();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut repaired = Vec::with_capacity(candidates.len());

    for c in candidates {
        if c.voice_id.is_empty() {
            repaired.push(c);
            continue;
        }
        let is_duplicate = exclusions.is_used(&c.voice_id) || claimed.contains(&c.voice_id);
        if !is_duplicate {
            claimed.insert(c.voice_id.clone());
            repaired.push(c);
            continue;
        }

        let original_gender = catalog.get(&c.voice_id).map(|v| v.gender);
        match pick_replacement(catalog, original_gender, &taken, exclusions) {
            Some(v) => {
                warn!(
                    "Duplicate voice '{}' for {}; reassigned to '{}'",
                    c.voice_id, c.character_name, v.id
                );
                taken.insert(v.id.clone());
                claimed.insert(v.id.clone());
                repaired.push(reassign(c, v, "duplicate voice"));
            }
            None => {
                warn!(
                    "Duplicate voice '{}' for {} and no unused voice left",
                    c.voice_id, c.character_name
                );
                repaired.push(c);
            }
        }
    }
    repaired
}

pub fn repair_narrator_conflicts(
    candidates: Vec<Candidate>,
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
) -> Vec<Candidate> {
    let narrator = exclusions.narrator();
    let narrator_gender = catalog.get(narrator).map(|v| v.gender);
    let mut taken: HashSet<String> = candidates.iter().map(|c| c.voice_id.clone()).collect();

    candidates
        .into_iter()
        .map(|c| {
            if !exclusions.is_narrator(&c.voice_id) {
                return c;
            }
            match pick_replacement(catalog, narrator_gender, &taken, exclusions) {
                Some(v) => {
                    warn!(
                        "{} was given the narrator voice; reassigned to '{}'",
                        c.character_name, v.id
                    );
                    taken.insert(v.id.clone());
                    reassign(c, v, "narrator voice")
                }
                None => {
                    warn!(
                        "{} was given the narrator voice and no unused voice is left",
                        c.character_name
                    );
                    c
                }
            }
        })
        .collect()
}

/// First free voice of `preferred` gender, else first free voice of any
/// gender, in catalog order.
fn pick_replacement<'a>(
    catalog: &'a VoiceCatalog,
    preferred: Option<VoiceGender>,
    taken: &HashSet<String>,
    exclusions: &ExclusionSet,
) -> Option<&'a Voice> {
    let is_free = |v: &Voice| !exclusions.is_excluded(&v.id) && !taken.contains(&v.id);

    preferred
        .and_then(|g| {
            catalog
                .voices()
                .iter()
                .find(|v| v.gender == g && is_free(*v))
        })
        .or_else(|| catalog.voices().iter().find(|v| is_free(*v)))
}

fn reassign(mut c: Candidate, voice: &Voice, reason: &str) -> Candidate {
    let previous = std::mem::replace(&mut c.voice_id, voice.id.clone());
    c.voice_name = Some(voice.name.clone());
    let note = format!("[auto-reassigned from {}: {}]", previous, reason);
    c.reasoning = if c.reasoning.trim().is_empty() {
        note
    } else {
        format!("{} {}", c.reasoning.trim(), note)
    };
    if c.reassigned_from.is_none() {
        c.reassigned_from = Some(previous);
    }
    c
}
