use crate::core::error::CastingError;
use crate::core::state::{Candidate, Character, Gender, Role, StoryContext, Voice};
use crate::services::catalog::{ExclusionSet, VoiceCatalog};
use crate::services::llm::LlmClient;
use crate::utils::json::strip_code_blocks;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CharacterDescriptor {
    pub name: String,
    pub role: Role,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
}

impl From<&Character> for CharacterDescriptor {
    fn from(c: &Character) -> Self {
        Self {
            name: c.name.clone(),
            role: c.role,
            gender: c.gender,
            description: c.description.clone(),
            age: c.age.clone(),
        }
    }
}

/// Everything the proposer is allowed to see. The voice lists never
/// contain the narrator or voices already bound in the session.
#[derive(Debug, Clone, Serialize)]
pub struct CastingRequest {
    pub characters: Vec<CharacterDescriptor>,
    pub context: StoryContext,
    pub male_voices: Vec<Voice>,
    pub female_voices: Vec<Voice>,
    pub neutral_voices: Vec<Voice>,
    pub narrator_voice_id: String,
}

impl CastingRequest {
    pub fn build(
        characters: &[Character],
        context: &StoryContext,
        catalog: &VoiceCatalog,
        exclusions: &ExclusionSet,
    ) -> Self {
        let partition = catalog.partition_by_gender(exclusions);
        let owned = |voices: Vec<&Voice>| voices.into_iter().cloned().collect::<Vec<_>>();
        Self {
            characters: characters.iter().map(CharacterDescriptor::from).collect(),
            context: context.clone(),
            male_voices: owned(partition.male),
            female_voices: owned(partition.female),
            neutral_voices: owned(partition.neutral),
            narrator_voice_id: exclusions.narrator().to_string(),
        }
    }
}

/// Proposes a voice for each requested character. Output is untrusted and
/// goes through repair and validation before anything is persisted.
#[async_trait]
pub trait CastingProposer: Send + Sync {
    async fn propose(&self, request: &CastingRequest) -> Result<Vec<Candidate>, CastingError>;
}

#[derive(Deserialize)]
struct ProposalDocument {
    #[serde(default)]
    assignments: Vec<ProposedAssignment>,
    #[serde(default)]
    validation: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ProposedAssignment {
    character_name: String,
    #[serde(default)]
    voice_id: String,
    #[serde(default)]
    voice_name: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parses the proposer's response document. An `error` field, an empty
/// assignment list and malformed JSON are all equally fatal.
pub fn parse_proposal(raw: &str) -> Result<Vec<Candidate>, CastingError> {
    let clean = strip_code_blocks(raw);
    if clean.is_empty() {
        return Err(CastingError::Proposer("empty response".to_string()));
    }

    let doc: ProposalDocument = serde_json::from_str(&clean)
        .map_err(|e| CastingError::Proposer(format!("malformed response ({}): {}", e, clean)))?;

    if let Some(err) = doc.error.filter(|e| !e.trim().is_empty()) {
        return Err(CastingError::Proposer(format!("proposer reported: {}", err)));
    }
    if doc.assignments.is_empty() {
        return Err(CastingError::Proposer("no assignments returned".to_string()));
    }
    if let Some(v) = &doc.validation {
        debug!("Proposer self-check: {}", v);
    }

    Ok(doc
        .assignments
        .into_iter()
        .map(|a| Candidate {
            character_name: a.character_name.trim().to_string(),
            voice_id: a.voice_id.trim().to_string(),
            voice_name: a.voice_name,
            reasoning: a.reasoning.unwrap_or_default(),
            resolved_from: None,
            reassigned_from: None,
        })
        .collect())
}

const SYSTEM_PROMPT: &str = "You are a casting director for an audio drama. Reply with a single valid JSON object and nothing else.";

#[derive(Serialize)]
struct VoiceLine<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    #[serde(skip_serializing_if = "no_hints")]
    suitable_for: &'a [String],
}

fn no_hints(hints: &&[String]) -> bool {
    hints.is_empty()
}

fn format_voice_list(voices: &[Voice]) -> String {
    if voices.is_empty() {
        return "(none)".to_string();
    }
    voices
        .iter()
        .map(|v| {
            serde_json::to_string(&VoiceLine {
                id: &v.id,
                name: &v.name,
                style: v.style.as_deref(),
                suitable_for: &v.suitable_for,
            })
            .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_prompt(request: &CastingRequest) -> String {
    let characters = serde_json::to_string_pretty(&request.characters).unwrap_or_default();
    let context = serde_json::to_string_pretty(&request.context).unwrap_or_default();

    format!(
        "Assign exactly one voice to each character below.\n\
         \nRules:\
         \n- Use each voice id at most once.\
         \n- Never use the narrator voice \"{narrator}\".\
         \n- Male characters take male voices, female characters take female voices.\
         \n- Characters of unknown gender may take any voice.\
         \n- voice_id must be copied exactly from the lists below.\
         \n\nStory context:\n{context}\
         \n\nCharacters:\n{characters}\
         \n\nMale voices:\n{male}\
         \n\nFemale voices:\n{female}\
         \n\nNeutral voices:\n{neutral}\
         \n\nReturn JSON only:\
         {{ \"assignments\": [ {{ \"character_name\": \"...\", \"voice_id\": \"...\", \"voice_name\": \"...\", \"reasoning\": \"...\" }} ], \
         \"validation\": {{ \"all_unique\": true, \"narrator_excluded\": true, \"genders_match\": true }} }}\
         \nIf the rules cannot be satisfied return {{ \"error\": \"...\", \"assignments\": [] }}.",
        narrator = request.narrator_voice_id,
        context = context,
        characters = characters,
        male = format_voice_list(&request.male_voices),
        female = format_voice_list(&request.female_voices),
        neutral = format_voice_list(&request.neutral_voices),
    )
}

#[derive(Debug)]
pub struct LlmCastingProposer {
    llm: Box<dyn LlmClient>,
    timeout: Duration,
}

impl LlmCastingProposer {
    pub fn new(llm: Box<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl CastingProposer for LlmCastingProposer {
    async fn propose(&self, request: &CastingRequest) -> Result<Vec<Candidate>, CastingError> {
        info!(
            "Requesting voice proposal for {} character(s)",
            request.characters.len()
        );
        let prompt = render_prompt(request);

        let reply = tokio::time::timeout(self.timeout, self.llm.chat(SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| {
                CastingError::Proposer(format!("timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| CastingError::Proposer(format!("{:#}", e)))?;

        parse_proposal(&reply)
    }
}
