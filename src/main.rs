use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use storycast::core::config::Config;
use storycast::core::io::{read_document, NativeStorage, Storage};
use storycast::core::state::{Character, DialogueEntry, NewCharacter, StoryContext};
use storycast::services::casting::proposer::LlmCastingProposer;
use storycast::services::casting::VoiceCaster;
use storycast::services::catalog::{ExclusionSet, VoiceCatalog};
use storycast::services::llm::create_llm;
use storycast::services::reconciler::{ReconcileRequest, SpeakerReconciler};
use storycast::services::store::{AssignmentStore, JsonFileStore};

#[derive(Parser, Debug)]
#[command(
    name = "storycast",
    version,
    about = "Cast voices for story characters and reconcile dialogue speakers"
)]
struct Cli {
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve speakers, cast missing voices and print the reconciled scene
    Reconcile {
        #[arg(short, long)]
        scene: PathBuf,
    },
    /// Report speakers without a voice, without changing anything
    Check {
        #[arg(short, long)]
        scene: PathBuf,
    },
    /// List catalog voices that can still be cast
    Voices {
        #[arg(short, long)]
        session: Option<String>,
    },
}

/// One scene as handed over by the story generator.
#[derive(Deserialize, Debug)]
struct SceneInput {
    session_id: String,
    dialogue: Vec<DialogueEntry>,
    #[serde(default)]
    new_characters: Vec<NewCharacter>,
    #[serde(default)]
    context: StoryContext,
    #[serde(default)]
    narrator_voice_id: Option<String>,
}

struct App {
    config: Config,
    storage: Arc<dyn Storage>,
    store: Arc<dyn AssignmentStore>,
    catalog: Arc<VoiceCatalog>,
}

impl App {
    async fn init(config_path: &Path) -> Result<Self> {
        let config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                eprintln!(
                    "Please ensure '{}' exists with valid LLM settings.",
                    config_path.display()
                );
                return Err(e);
            }
        };
        config.ensure_directories()?;

        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let catalog = VoiceCatalog::load(storage.as_ref(), &config.casting.catalog_path).await?;
        let store: Arc<dyn AssignmentStore> =
            Arc::new(JsonFileStore::new(config.store_folder.clone(), storage.clone()));

        Ok(Self {
            config,
            storage,
            store,
            catalog: Arc::new(catalog),
        })
    }

    fn narrator_for(&self, scene: Option<&str>) -> Result<String> {
        scene
            .map(str::to_string)
            .or_else(|| self.config.casting.narrator_voice.clone())
            .context("No narrator voice: set casting.narrator_voice or narrator_voice_id in the scene")
    }

    fn reconciler(&self) -> Result<SpeakerReconciler> {
        let llm = create_llm(&self.config.llm)?;
        let timeout = Duration::from_secs(self.config.casting.proposer_timeout_seconds);
        let proposer = Arc::new(LlmCastingProposer::new(llm, timeout));
        let caster = VoiceCaster::new(self.catalog.clone(), proposer)
            .with_strict_gender(self.config.casting.strict_gender);
        Ok(SpeakerReconciler::new(self.store.clone(), caster))
    }

    async fn load_scene(&self, path: &Path) -> Result<SceneInput> {
        read_document(self.storage.as_ref(), &path.to_string_lossy())
            .await
            .with_context(|| format!("Failed to load scene {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let app = App::init(&cli.config).await?;

    match cli.command {
        Command::Reconcile { scene } => {
            let scene = app.load_scene(&scene).await?;
            let narrator = app.narrator_for(scene.narrator_voice_id.as_deref())?;
            let existing: Vec<Character> = app.store.characters(&scene.session_id).await?;
            let reconciler = app.reconciler()?;

            let outcome = reconciler
                .reconcile_speakers(ReconcileRequest {
                    session_id: &scene.session_id,
                    dialogue: &scene.dialogue,
                    declared_characters: &scene.new_characters,
                    existing_characters: &existing,
                    context: &scene.context,
                    narrator_voice_id: &narrator,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Check { scene } => {
            let scene = app.load_scene(&scene).await?;
            let reconciler = app.reconciler()?;
            let result = reconciler
                .quick_validate(&scene.session_id, &scene.dialogue)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.valid {
                std::process::exit(1);
            }
        }
        Command::Voices { session } => {
            let narrator = app.narrator_for(None).unwrap_or_default();
            let mut exclusions = ExclusionSet::new(narrator);
            if let Some(session) = session {
                let bindings = app.store.bindings(&session).await?;
                exclusions = exclusions.with_used(bindings.into_iter().map(|b| b.voice_id));
            }
            let voices: Vec<_> = app.catalog.available(&exclusions).collect();
            println!("{}", serde_json::to_string_pretty(&voices)?);
        }
    }

    Ok(())
}
