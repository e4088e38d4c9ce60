use crate::core::error::CastingError;
use crate::core::state::{
    name_key, Character, DialogueEntry, Gender, NewCharacter, Provenance, Role, StoryContext,
    VoiceBinding,
};
use crate::services::casting::VoiceCaster;
use crate::services::catalog::ExclusionSet;
use crate::services::store::{AssignmentStore, InsertOutcome};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const AUTO_CREATED_DESCRIPTION: &str = "Introduced in dialogue without a character profile";

/// Full-name and first-name lookup over an ordered list of names.
///
/// A first name is indexed only when it is not also somebody's full name,
/// and the earliest character with a given first name keeps it: adding
/// "Mara Quill" after "Mara Ellery" does not move "Mara".
#[derive(Debug, Default)]
pub struct NameIndex {
    full: HashMap<String, usize>,
    first: HashMap<String, usize>,
}

impl NameIndex {
    pub fn build<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let keys: Vec<String> = names.into_iter().map(name_key).collect();
        let mut index = Self::default();

        for (i, key) in keys.iter().enumerate() {
            if !key.is_empty() {
                index.full.entry(key.clone()).or_insert(i);
            }
        }
        for (i, key) in keys.iter().enumerate() {
            if let Some(first) = first_name(key) {
                if !index.full.contains_key(first) {
                    index.first.entry(first.to_string()).or_insert(i);
                }
            }
        }
        index
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        let key = name_key(name);
        self.full
            .get(&key)
            .or_else(|| self.first.get(&key))
            .copied()
    }
}

/// First token of a multi-word name key.
fn first_name(key: &str) -> Option<&str> {
    let (first, rest) = key.split_once(' ')?;
    (!first.is_empty() && !rest.is_empty()).then_some(first)
}

/// Distinct non-narrator speakers in order of first appearance.
pub fn distinct_speakers(dialogue: &[DialogueEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    dialogue
        .iter()
        .filter(|d| !d.is_narration())
        .map(|d| d.speaker.trim().to_string())
        .filter(|s| seen.insert(name_key(s)))
        .collect()
}

pub struct ReconcileRequest<'a> {
    pub session_id: &'a str,
    pub dialogue: &'a [DialogueEntry],
    pub declared_characters: &'a [NewCharacter],
    pub existing_characters: &'a [Character],
    pub context: &'a StoryContext,
    pub narrator_voice_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Dialogue with speakers canonicalised and voices filled in.
    pub validated_dialogue: Vec<DialogueEntry>,
    pub created_characters: Vec<Character>,
    /// Dialogue speaker name -> voice id.
    pub voice_assignments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuickValidation {
    pub valid: bool,
    pub missing_speakers: Vec<String>,
}

pub struct SpeakerReconciler {
    store: Arc<dyn AssignmentStore>,
    caster: VoiceCaster,
}

impl SpeakerReconciler {
    pub fn new(store: Arc<dyn AssignmentStore>, caster: VoiceCaster) -> Self {
        Self { store, caster }
    }

    pub fn caster(&self) -> &VoiceCaster {
        &self.caster
    }

    /// Resolves every dialogue speaker to a character, creating minor
    /// characters where needed, casts voices for characters that lack one
    /// and checks that every speaker ends up with a voice.
    pub async fn reconcile_speakers(
        &self,
        req: ReconcileRequest<'_>,
    ) -> Result<ReconcileOutcome, CastingError> {
        let session_id = req.session_id;
        let speakers = distinct_speakers(req.dialogue);
        info!(
            "Reconciling {} speaker(s) for session {}",
            speakers.len(),
            session_id
        );

        // Store rows first, in creation order, so first names stay with
        // whoever claimed them earliest.
        let mut roster = self.store.characters(session_id).await?;
        for c in req.existing_characters {
            if roster.iter().any(|r| r.id == c.id) {
                continue;
            }
            let persisted = self
                .insert_or_reuse(session_id, &NewCharacter::from(c), c.provenance)
                .await?
                .into_character();
            if !roster.iter().any(|r| r.id == persisted.id) {
                roster.push(persisted);
            }
        }

        // Known speakers
        let index = NameIndex::build(roster.iter().map(|c| c.name.as_str()));
        let mut speaker_ids: HashMap<String, String> = HashMap::new();
        let mut unknown = Vec::new();
        for speaker in &speakers {
            match index.lookup(speaker) {
                Some(i) => {
                    debug!("Speaker '{}' is '{}'", speaker, roster[i].name);
                    speaker_ids.insert(name_key(speaker), roster[i].id.clone());
                }
                None => unknown.push(speaker.as_str()),
            }
        }

        // Declared newcomers, then anything left over
        let declared_index =
            NameIndex::build(req.declared_characters.iter().map(|c| c.name.as_str()));
        let mut from_declared: HashMap<usize, Character> = HashMap::new();
        let mut created = Vec::new();

        for speaker in unknown {
            let character = match declared_index.lookup(speaker) {
                Some(i) => match from_declared.get(&i) {
                    Some(c) => c.clone(),
                    None => {
                        let c = self
                            .create_character(
                                session_id,
                                &req.declared_characters[i],
                                Provenance::Declared,
                                &mut created,
                            )
                            .await?;
                        from_declared.insert(i, c.clone());
                        c
                    }
                },
                None => {
                    warn!(
                        "Speaker '{}' was never declared; creating a minor character",
                        speaker
                    );
                    let minor = NewCharacter {
                        name: speaker.to_string(),
                        gender: Gender::Unknown,
                        role: Role::Minor,
                        description: Some(AUTO_CREATED_DESCRIPTION.to_string()),
                        age: None,
                    };
                    self.create_character(
                        session_id,
                        &minor,
                        Provenance::AutoCreated,
                        &mut created,
                    )
                    .await?
                }
            };
            speaker_ids.insert(name_key(speaker), character.id.clone());
            if !roster.iter().any(|r| r.id == character.id) {
                roster.push(character);
            }
        }

        // Cast everyone still without a voice
        let bindings = self.store.bindings(session_id).await?;
        let bound: HashSet<&str> = bindings.iter().map(|b| b.character_id.as_str()).collect();
        let unbound: Vec<Character> = roster
            .iter()
            .filter(|c| !bound.contains(c.id.as_str()))
            .cloned()
            .collect();
        let exclusions = ExclusionSet::new(req.narrator_voice_id)
            .with_used(bindings.iter().map(|b| b.voice_id.clone()));

        let assignments = self.caster.cast(&unbound, req.context, &exclusions).await?;
        for a in &assignments {
            info!("Cast '{}' as voice '{}'", a.character_name, a.voice_id);
            self.store
                .upsert_binding(&VoiceBinding {
                    session_id: session_id.to_string(),
                    character_id: a.character_id.clone(),
                    character_name: a.character_name.clone(),
                    voice_id: a.voice_id.clone(),
                    voice_name: a.voice_name.clone(),
                    reasoning: Some(a.reasoning.clone()),
                })
                .await?;
        }

        // Every speaker must now resolve to a stored binding
        let bindings = self.store.bindings(session_id).await?;
        let binding_index =
            NameIndex::build(bindings.iter().map(|b| b.character_name.as_str()));
        let mut voice_assignments = BTreeMap::new();
        let mut canonical_names = HashMap::new();
        let mut missing = Vec::new();

        for speaker in &speakers {
            let binding = speaker_ids
                .get(&name_key(speaker))
                .and_then(|id| bindings.iter().find(|b| &b.character_id == id))
                .or_else(|| binding_index.lookup(speaker).map(|i| &bindings[i]));
            match binding {
                Some(b) => {
                    voice_assignments.insert(speaker.clone(), b.voice_id.clone());
                    canonical_names.insert(
                        name_key(speaker),
                        (b.character_name.clone(), b.voice_id.clone()),
                    );
                }
                None => missing.push(speaker.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CastingError::Coverage(missing));
        }

        let validated_dialogue = req
            .dialogue
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if entry.is_narration() {
                    entry.voice_id = Some(req.narrator_voice_id.to_string());
                } else if let Some((name, voice)) = canonical_names.get(&name_key(&entry.speaker)) {
                    entry.speaker = name.clone();
                    entry.voice_id = Some(voice.clone());
                }
                entry
            })
            .collect();

        Ok(ReconcileOutcome {
            validated_dialogue,
            created_characters: created,
            voice_assignments,
        })
    }

    /// Read-only pre-flight: which speakers have no stored voice yet.
    pub async fn quick_validate(
        &self,
        session_id: &str,
        dialogue: &[DialogueEntry],
    ) -> Result<QuickValidation, CastingError> {
        let bindings = self.store.bindings(session_id).await?;
        let index = NameIndex::build(bindings.iter().map(|b| b.character_name.as_str()));

        let missing_speakers: Vec<String> = distinct_speakers(dialogue)
            .into_iter()
            .filter(|s| index.lookup(s).is_none())
            .collect();

        Ok(QuickValidation {
            valid: missing_speakers.is_empty(),
            missing_speakers,
        })
    }

    /// Inserts a character, reusing the existing row on a name collision.
    async fn create_character(
        &self,
        session_id: &str,
        character: &NewCharacter,
        provenance: Provenance,
        created: &mut Vec<Character>,
    ) -> Result<Character, CastingError> {
        match self
            .insert_or_reuse(session_id, character, provenance)
            .await?
        {
            InsertOutcome::Created(c) => {
                info!("Created character '{}' ({:?})", c.name, provenance);
                created.push(c.clone());
                Ok(c)
            }
            InsertOutcome::Existing(c) => Ok(c),
        }
    }

    /// Insert with compare-and-use semantics: a name collision, or a failed
    /// insert whose row turns up on re-read, yields the existing row.
    async fn insert_or_reuse(
        &self,
        session_id: &str,
        character: &NewCharacter,
        provenance: Provenance,
    ) -> Result<InsertOutcome, CastingError> {
        match self
            .store
            .insert_character(session_id, character, provenance)
            .await
        {
            Ok(InsertOutcome::Existing(c)) => {
                debug!("Reusing existing character '{}'", c.name);
                Ok(InsertOutcome::Existing(c))
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    "Insert of '{}' failed ({:#}); looking for a concurrent insert",
                    character.name, e
                );
                let key = name_key(&character.name);
                self.store
                    .characters(session_id)
                    .await?
                    .into_iter()
                    .find(|c| name_key(&c.name) == key)
                    .map(InsertOutcome::Existing)
                    .ok_or(CastingError::Store(e))
            }
        }
    }
}
