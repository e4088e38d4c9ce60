use crate::core::io::Storage;
use crate::core::state::{name_key, Character, NewCharacter, Provenance, VoiceBinding};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Character),
    /// A character with the same name already exists in the session.
    Existing(Character),
}

impl InsertOutcome {
    pub fn into_character(self) -> Character {
        match self {
            InsertOutcome::Created(c) | InsertOutcome::Existing(c) => c,
        }
    }
}

/// Persistence for characters and character -> voice bindings. All state
/// is scoped by session id.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Characters in creation order.
    async fn characters(&self, session_id: &str) -> Result<Vec<Character>>;

    /// Inserts unless a character with the same (case-insensitive) name
    /// exists, in which case the existing row is returned.
    async fn insert_character(
        &self,
        session_id: &str,
        character: &NewCharacter,
        provenance: Provenance,
    ) -> Result<InsertOutcome>;

    async fn binding(&self, session_id: &str, character_id: &str) -> Result<Option<VoiceBinding>>;

    async fn upsert_binding(&self, binding: &VoiceBinding) -> Result<()>;

    /// Bindings joined to character names, in character creation order.
    async fn bindings(&self, session_id: &str) -> Result<Vec<VoiceBinding>>;
}

pub fn generate_character_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// Characters and bindings of one session.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
struct SessionState {
    characters: Vec<Character>,
    bindings: HashMap<String, VoiceBinding>,
}

impl SessionState {
    fn insert(
        &mut self,
        session_id: &str,
        new: &NewCharacter,
        provenance: Provenance,
    ) -> InsertOutcome {
        let key = name_key(&new.name);
        if let Some(existing) = self.characters.iter().find(|c| name_key(&c.name) == key) {
            debug!("Character '{}' already exists in session {}", new.name, session_id);
            return InsertOutcome::Existing(existing.clone());
        }
        let character = Character {
            id: generate_character_id(),
            session_id: session_id.to_string(),
            name: new.name.trim().to_string(),
            gender: new.gender,
            role: new.role,
            description: new.description.clone(),
            age: new.age.clone(),
            provenance,
        };
        self.characters.push(character.clone());
        InsertOutcome::Created(character)
    }

    fn upsert(&mut self, binding: &VoiceBinding) -> Result<()> {
        let character = self
            .characters
            .iter()
            .find(|c| c.id == binding.character_id)
            .with_context(|| format!("Unknown character id {}", binding.character_id))?;
        let mut binding = binding.clone();
        binding.character_name = character.name.clone();
        self.bindings.insert(binding.character_id.clone(), binding);
        Ok(())
    }

    fn ordered_bindings(&self) -> Vec<VoiceBinding> {
        self.characters
            .iter()
            .filter_map(|c| {
                self.bindings.get(&c.id).map(|b| VoiceBinding {
                    character_name: c.name.clone(),
                    ..b.clone()
                })
            })
            .collect()
    }
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryStore lock poisoned"))?;
        Ok(f(sessions.entry(session_id.to_string()).or_default()))
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn characters(&self, session_id: &str) -> Result<Vec<Character>> {
        self.with_session(session_id, |s| s.characters.clone())
    }

    async fn insert_character(
        &self,
        session_id: &str,
        character: &NewCharacter,
        provenance: Provenance,
    ) -> Result<InsertOutcome> {
        self.with_session(session_id, |s| s.insert(session_id, character, provenance))
    }

    async fn binding(&self, session_id: &str, character_id: &str) -> Result<Option<VoiceBinding>> {
        self.with_session(session_id, |s| {
            s.ordered_bindings()
                .into_iter()
                .find(|b| b.character_id == character_id)
        })
    }

    async fn upsert_binding(&self, binding: &VoiceBinding) -> Result<()> {
        self.with_session(&binding.session_id, |s| s.upsert(binding))?
    }

    async fn bindings(&self, session_id: &str) -> Result<Vec<VoiceBinding>> {
        self.with_session(session_id, |s| s.ordered_bindings())
    }
}

/// Stores each session as `<root>/<session>/characters.json` and
/// `<root>/<session>/bindings.json`.
pub struct JsonFileStore {
    root: String,
    storage: Arc<dyn Storage>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: root.into(),
            storage,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path(&self, session_id: &str, file: &str) -> String {
        Path::new(&self.root)
            .join(session_id)
            .join(file)
            .to_string_lossy()
            .to_string()
    }

    async fn load(&self, session_id: &str) -> Result<SessionState> {
        let characters_path = self.path(session_id, "characters.json");
        let bindings_path = self.path(session_id, "bindings.json");

        let characters = if self.storage.exists(&characters_path).await? {
            let bytes = self.storage.read(&characters_path).await?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", characters_path))?
        } else {
            Vec::new()
        };
        let bindings: Vec<VoiceBinding> = if self.storage.exists(&bindings_path).await? {
            let bytes = self.storage.read(&bindings_path).await?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", bindings_path))?
        } else {
            Vec::new()
        };

        Ok(SessionState {
            characters,
            bindings: bindings
                .into_iter()
                .map(|b| (b.character_id.clone(), b))
                .collect(),
        })
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let characters = serde_json::to_string_pretty(&state.characters)?;
        self.storage
            .write(&self.path(session_id, "characters.json"), characters.as_bytes())
            .await?;
        let bindings = serde_json::to_string_pretty(&state.ordered_bindings())?;
        self.storage
            .write(&self.path(session_id, "bindings.json"), bindings.as_bytes())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for JsonFileStore {
    async fn characters(&self, session_id: &str) -> Result<Vec<Character>> {
        Ok(self.load(session_id).await?.characters)
    }

    async fn insert_character(
        &self,
        session_id: &str,
        character: &NewCharacter,
        provenance: Provenance,
    ) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load(session_id).await?;
        let outcome = state.insert(session_id, character, provenance);
        if let InsertOutcome::Created(_) = outcome {
            self.save(session_id, &state).await?;
        }
        Ok(outcome)
    }

    async fn binding(&self, session_id: &str, character_id: &str) -> Result<Option<VoiceBinding>> {
        Ok(self
            .load(session_id)
            .await?
            .ordered_bindings()
            .into_iter()
            .find(|b| b.character_id == character_id))
    }

    async fn upsert_binding(&self, binding: &VoiceBinding) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load(&binding.session_id).await?;
        state.upsert(binding)?;
        self.save(&binding.session_id, &state).await
    }

    async fn bindings(&self, session_id: &str) -> Result<Vec<VoiceBinding>> {
        Ok(self.load(session_id).await?.ordered_bindings())
    }
}
