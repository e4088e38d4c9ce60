pub mod capacity;
pub mod proposer;
pub mod repair;
pub mod validation;

use crate::core::error::CastingError;
use crate::core::state::{name_key, Character, StoryContext};
use crate::services::catalog::{ExclusionSet, VoiceCatalog};
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use capacity::check_capacity;
use proposer::{CastingProposer, CastingRequest};
use repair::run_repairs;
use validation::validate;

/// An accepted (character, voice) pair, ready to be persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CastAssignment {
    pub character_id: String,
    pub character_name: String,
    pub voice_id: String,
    pub voice_name: Option<String>,
    pub reasoning: String,
}

pub struct VoiceCaster {
    catalog: Arc<VoiceCatalog>,
    proposer: Arc<dyn CastingProposer>,
    strict_gender: bool,
}

impl VoiceCaster {
    pub fn new(catalog: Arc<VoiceCatalog>, proposer: Arc<dyn CastingProposer>) -> Self {
        Self {
            catalog,
            proposer,
            strict_gender: true,
        }
    }

    pub fn with_strict_gender(mut self, strict: bool) -> Self {
        self.strict_gender = strict;
        self
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Capacity check, proposal, repair and validation, in that order.
    /// Either every character gets a voice or the whole batch fails.
    pub async fn cast(
        &self,
        characters: &[Character],
        context: &StoryContext,
        exclusions: &ExclusionSet,
    ) -> Result<Vec<CastAssignment>, CastingError> {
        if characters.is_empty() {
            return Ok(Vec::new());
        }

        let report = check_capacity(characters, &self.catalog, exclusions)?;
        info!(
            "Casting {} character(s) ({} female, {} male/unknown)",
            characters.len(),
            report.female_needed,
            report.male_needed
        );

        let request = CastingRequest::build(characters, context, &self.catalog, exclusions);
        let proposed = self.proposer.propose(&request).await?;

        let repaired = run_repairs(proposed, &self.catalog, exclusions);
        validate(
            &repaired,
            characters,
            &self.catalog,
            exclusions,
            self.strict_gender,
        )?;

        let by_name: HashMap<String, &Character> =
            characters.iter().map(|c| (name_key(&c.name), c)).collect();

        let mut assignments = Vec::with_capacity(repaired.len());
        for candidate in repaired {
            // validation guarantees every candidate names a requested character
            let Some(character) = by_name.get(&name_key(&candidate.character_name)) else {
                continue;
            };
            let voice_name = candidate
                .voice_name
                .or_else(|| self.catalog.get(&candidate.voice_id).map(|v| v.name.clone()));
            assignments.push(CastAssignment {
                character_id: character.id.clone(),
                character_name: character.name.clone(),
                voice_id: candidate.voice_id,
                voice_name,
                reasoning: candidate.reasoning,
            });
        }
        Ok(assignments)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::{Candidate, Gender, Provenance, Role, VoiceGender};
    use crate::services::catalog::voice;
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub(crate) fn character(id: &str, name: &str, gender: Gender) -> Character {
        Character {
            id: id.to_string(),
            session_id: "s1".to_string(),
            name: name.to_string(),
            gender,
            role: Role::Supporting,
            description: None,
            age: None,
            provenance: Provenance::Planned,
        }
    }

    /// Replays a fixed proposal and counts how often it was asked.
    pub(crate) struct ScriptedProposer {
        pub calls: Arc<Mutex<usize>>,
        pub reply: Result<Vec<(String, String)>, String>,
    }

    impl ScriptedProposer {
        pub(crate) fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                calls: Arc::new(Mutex::new(0)),
                reply: Ok(pairs
                    .iter()
                    .map(|(c, v)| (c.to_string(), v.to_string()))
                    .collect()),
            }
        }

        pub(crate) fn failing(msg: &str) -> Self {
            Self {
                calls: Arc::new(Mutex::new(0)),
                reply: Err(msg.to_string()),
            }
        }
    }

    #[async_trait]
    impl CastingProposer for ScriptedProposer {
        async fn propose(&self, _: &CastingRequest) -> Result<Vec<Candidate>, CastingError> {
            *self.calls.lock().unwrap() += 1;
            match &self.reply {
                Ok(pairs) => Ok(pairs
                    .iter()
                    .map(|(c, v)| Candidate {
                        character_name: c.clone(),
                        voice_id: v.clone(),
                        reasoning: "scripted".to_string(),
                        ..Default::default()
                    })
                    .collect()),
                Err(msg) => Err(CastingError::Proposer(msg.clone())),
            }
        }
    }

    fn two_voice_catalog() -> Arc<VoiceCatalog> {
        Arc::new(
            VoiceCatalog::new(vec![
                voice("N", "Nell", VoiceGender::Female),
                voice("M1", "Marcus", VoiceGender::Male),
                voice("F1", "Freya", VoiceGender::Female),
            ])
            .unwrap(),
        )
    }

    fn pair() -> Vec<Character> {
        vec![
            character("a", "Al", Gender::Male),
            character("b", "Bea", Gender::Female),
        ]
    }

    #[tokio::test]
    async fn test_end_to_end_two_characters() {
        let proposer = Arc::new(ScriptedProposer::new(&[("Al", "M1"), ("Bea", "F1")]));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer.clone());

        let out = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|a| a.voice_id != "N"));
        assert_eq!(out[0].character_id, "a");
        assert_eq!(out[0].voice_name.as_deref(), Some("Marcus"));
        assert_eq!(out[1].voice_id, "F1");
        assert_eq!(*proposer.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_failure_skips_proposer() {
        let catalog = Arc::new(
            VoiceCatalog::new(vec![
                voice("N", "Nell", VoiceGender::Female),
                voice("M1", "Marcus", VoiceGender::Male),
            ])
            .unwrap(),
        );
        let proposer = Arc::new(ScriptedProposer::new(&[("Al", "M1"), ("Bea", "N")]));
        let caster = VoiceCaster::new(catalog, proposer.clone());

        let err = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CastingError::Capacity {
                female_needed: 1,
                female_available: 0,
                ..
            }
        ));
        assert_eq!(*proposer.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_three_female_characters_two_female_voices() {
        let catalog = Arc::new(
            VoiceCatalog::new(vec![
                voice("N", "Nell", VoiceGender::Female),
                voice("F1", "Freya", VoiceGender::Female),
                voice("F2", "Fiona", VoiceGender::Female),
                voice("M1", "Marcus", VoiceGender::Male),
            ])
            .unwrap(),
        );
        let proposer = Arc::new(ScriptedProposer::new(&[]));
        let caster = VoiceCaster::new(catalog, proposer.clone());
        let cast = vec![
            character("a", "Ann", Gender::Female),
            character("b", "Bea", Gender::Female),
            character("c", "Cat", Gender::Female),
        ];

        let err = caster
            .cast(&cast, &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap_err();
        assert!(matches!(err, CastingError::Capacity { .. }));
        assert_eq!(*proposer.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_repair_then_validation() {
        let proposer = Arc::new(ScriptedProposer::new(&[("Al", "M1"), ("Bea", "M1")]));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer);

        let out = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap();
        // Bea (female) received F1 through the any-gender fallback.
        assert_eq!(out[1].voice_id, "F1");
        assert!(out[1].reasoning.contains("auto-reassigned from M1"));

        let proposer = Arc::new(ScriptedProposer::new(&[("Al", "F1"), ("Bea", "F1")]));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer);
        let err = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap_err();
        match err {
            CastingError::Validation(violations) => {
                assert!(violations
                    .iter()
                    .any(|v| matches!(v, crate::core::error::Violation::GenderMismatch { .. })));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_advisory_gender_accepts_mismatch() {
        let proposer = Arc::new(ScriptedProposer::new(&[("Al", "F1"), ("Bea", "M1")]));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer).with_strict_gender(false);
        let out = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_proposer_error_propagates() {
        let proposer = Arc::new(ScriptedProposer::failing("model unavailable"));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer);
        let err = caster
            .cast(&pair(), &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap_err();
        assert!(matches!(err, CastingError::Proposer(_)));
    }

    /// Proposals with random duplicates, narrator ids, display names and
    /// garbage must come out of repair either fully valid or rejected.
    #[test]
    fn test_random_proposals_are_repaired_or_rejected() {
        use crate::core::error::Violation;
        use rand::Rng;
        use std::collections::HashSet;

        let catalog = VoiceCatalog::new(vec![
            voice("N", "Nell", VoiceGender::Female),
            voice("M1", "Marcus", VoiceGender::Male),
            voice("M2", "Milo", VoiceGender::Male),
            voice("M3", "Mateo", VoiceGender::Male),
            voice("F1", "Freya", VoiceGender::Female),
            voice("F2", "Fiona", VoiceGender::Female),
            voice("X1", "Sky", VoiceGender::Neutral),
        ])
        .unwrap();
        let genders = [Gender::Male, Gender::Female, Gender::Unknown];
        let references = [
            "N", "Nell", "M1", "M2", "M3", "F1", "F2", "X1", "marcus", "Freya (F1)",
            "Milo (M2)", "Nell (N)", "Sky", "nobody", "",
        ];
        let mut rng = rand::rng();

        for _ in 0..500 {
            let cast: Vec<Character> = (0..rng.random_range(1..=5))
                .map(|i| {
                    let gender = genders[rng.random_range(0..genders.len())];
                    character(&format!("c{i}"), &format!("Char {i}"), gender)
                })
                .collect();
            let used: Vec<&str> = ["M3", "F2"]
                .into_iter()
                .filter(|_| rng.random_bool(0.3))
                .collect();
            let exclusions = ExclusionSet::new("N").with_used(used);

            let proposed: Vec<Candidate> = cast
                .iter()
                .map(|c| Candidate {
                    character_name: c.name.clone(),
                    voice_id: references[rng.random_range(0..references.len())].to_string(),
                    ..Default::default()
                })
                .collect();
            let strict = rng.random_bool(0.5);

            let repaired = run_repairs(proposed.clone(), &catalog, &exclusions);
            match validate(&repaired, &cast, &catalog, &exclusions, strict) {
                Ok(()) => {
                    let mut seen = HashSet::new();
                    for c in &repaired {
                        assert!(catalog.contains(&c.voice_id), "{proposed:?} -> {repaired:?}");
                        assert!(!exclusions.is_excluded(&c.voice_id), "{repaired:?}");
                        assert!(seen.insert(c.voice_id.clone()), "{repaired:?}");
                    }
                    assert_eq!(repaired.len(), cast.len());
                }
                Err(CastingError::Validation(violations)) => {
                    assert!(!violations.is_empty());
                    // Repair never hands out the narrator while a free voice exists.
                    if violations.iter().any(|v| matches!(v, Violation::NarratorVoice { .. })) {
                        let free = catalog.available(&exclusions).count();
                        assert!(free < cast.len(), "{proposed:?} -> {repaired:?}");
                    }
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_cast_skips_everything() {
        let proposer = Arc::new(ScriptedProposer::new(&[]));
        let caster = VoiceCaster::new(two_voice_catalog(), proposer.clone());
        let out = caster
            .cast(&[], &StoryContext::default(), &ExclusionSet::new("N"))
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(*proposer.calls.lock().unwrap(), 0);
    }
}
