use std::sync::Arc;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::background;
use crate::chat::catalog::ModelCatalog;
use crate::chat::locks::TurnLocks;
use crate::config::{ChatConfig, ModelInfo};
use crate::db::{Conversation, ConversationStore, Role, Tier, User, UserStore};
use crate::error::{AppError, UpstreamError};
use crate::proxy::{ChatMessage, CompletionOptions, TokenUsage, UpstreamChatClient};

/// How the reply is fetched from the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Streamed,
    Buffered,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user: User,
    pub text: String,
    pub model: Option<String>,
    pub conversation_id: Option<i64>,
    pub mode: ResponseMode,
    pub enable_thinking: bool,
}

/// Everything a transport needs to relay one turn.
#[derive(Debug)]
pub enum ChatEvent {
    Chunk(String),
    Done {
        conversation_id: i64,
        message_id: Option<i64>,
        usage: TokenUsage,
    },
    Failed(AppError),
}

/// A running turn. Dropping `events` cancels the upstream call; whatever was
/// already relayed is still persisted.
#[derive(Debug)]
pub struct ChatTurn {
    pub conversation_id: i64,
    pub model: String,
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    HistoryLoaded,
    Streaming,
    Persisting,
    Done,
    Errored,
}

enum UpstreamOutcome {
    Completed(Option<TokenUsage>),
    Cancelled,
    Failed(UpstreamError),
}

struct Turn {
    user: User,
    conversation: Conversation,
    model: ModelInfo,
    mode: ResponseMode,
    options: CompletionOptions,
    events: mpsc::UnboundedSender<ChatEvent>,
    _guard: OwnedMutexGuard<()>,
    state: TurnState,
}

impl Turn {
    fn advance(&mut self, next: TurnState) {
        debug!(
            "Conversation {} turn {:?} -> {:?}",
            self.conversation.id, self.state, next
        );
        self.state = next;
    }
}

/// Drives one user message through persistence, the upstream model and back to the caller.
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    users: Arc<dyn UserStore>,
    upstream: Arc<dyn UpstreamChatClient>,
    catalog: Arc<ModelCatalog>,
    locks: Arc<TurnLocks>,
    config: Arc<ChatConfig>,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        users: Arc<dyn UserStore>,
        upstream: Arc<dyn UpstreamChatClient>,
        catalog: ModelCatalog,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            users,
            upstream,
            catalog: Arc::new(catalog),
            locks: Arc::new(TurnLocks::new()),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn list_models(&self, tier: Tier) -> Vec<ModelInfo> {
        self.catalog.available(tier)
    }

    /// Validate and record the user's message, then start the turn on its own task.
    ///
    /// Validation, model permission and conversation ownership failures are
    /// returned before anything is written or sent upstream.
    pub async fn process_user_message(&self, request: ChatRequest) -> Result<ChatTurn, AppError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput("message must not be empty".to_string()));
        }

        let model = self.catalog.resolve(request.model.as_deref(), request.user.tier)?;
        let conversation = self
            .store
            .ensure_conversation(request.user.id, request.conversation_id, &model.id)
            .await?;

        let guard = self.locks.acquire(conversation.id).await;
        self.store.append_message(conversation.id, Role::User, text).await?;

        info!(
            "User {} sent message to conversation {} using {}",
            request.user.id, conversation.id, model.id
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let conversation_id = conversation.id;
        let model_id = model.id.clone();

        let turn = Turn {
            user: request.user,
            conversation,
            model,
            mode: request.mode,
            options: CompletionOptions::thinking(request.enable_thinking),
            events: tx,
            _guard: guard,
            state: TurnState::Idle,
        };

        let orchestrator = self.clone();
        let task = tokio::spawn(async move { orchestrator.run_turn(turn).await });

        Ok(ChatTurn {
            conversation_id,
            model: model_id,
            events: rx,
            task,
        })
    }

    /// Hard-delete an owned conversation, waiting for any turn still writing to it.
    pub async fn delete_conversation(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError> {
        let _guard = self.locks.acquire(conversation_id).await;
        self.store.permanent_delete(user_id, conversation_id).await?;
        info!("Permanently deleted conversation {} for user {}", conversation_id, user_id);
        Ok(())
    }

    fn system_prompt(&self, user: &User) -> Option<String> {
        let base = self.config.system_prompt.trim();
        let memory = user.memory_info.trim();

        let prompt = match (base.is_empty(), memory.is_empty()) {
            (true, true) => return None,
            (false, true) => base.to_string(),
            (true, false) => format!("Remember the following about the user:\n{}", memory),
            (false, false) => format!("{}\n\nRemember the following about the user:\n{}", base, memory),
        };
        Some(prompt)
    }

    async fn run_turn(&self, mut turn: Turn) {
        let conversation_id = turn.conversation.id;

        let history = match self
            .store
            .load_history(conversation_id, Some(self.config.history_limit))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                error!("Failed to load history for conversation {}: {}", conversation_id, e);
                turn.advance(TurnState::Errored);
                let _ = turn.events.send(ChatEvent::Failed(e));
                return;
            }
        };
        turn.advance(TurnState::HistoryLoaded);

        let mut prompt = Vec::with_capacity(history.len() + 1);
        if let Some(system) = self.system_prompt(&turn.user) {
            prompt.push(ChatMessage::system(system));
        }
        prompt.extend(history.iter().map(ChatMessage::from));
        let first_reply = history.iter().all(|message| message.role != Role::Assistant);

        turn.advance(TurnState::Streaming);
        let mut delivered = String::new();
        let outcome = self.call_upstream(&turn, &prompt, &mut delivered).await;

        turn.advance(TurnState::Persisting);
        let reported = match &outcome {
            UpstreamOutcome::Completed(usage) => *usage,
            _ => None,
        };
        let usage = reported.unwrap_or_else(|| TokenUsage::estimate(&prompt, &delivered));

        let persisted = self.persist(&turn, &delivered, usage).await;

        match (outcome, persisted) {
            (UpstreamOutcome::Cancelled, persisted) => {
                info!(
                    "Turn on conversation {} cancelled after {} chars",
                    conversation_id,
                    delivered.len()
                );
                if let Err(e) = persisted {
                    error!(
                        "Failed to persist cancelled reply for conversation {}: {}",
                        conversation_id, e
                    );
                    turn.advance(TurnState::Errored);
                    return;
                }
                turn.advance(TurnState::Done);
            }
            (UpstreamOutcome::Failed(e), persisted) => {
                warn!("Upstream failed for conversation {}: {}", conversation_id, e);
                if let Err(persist_error) = persisted {
                    error!(
                        "Failed to persist partial reply for conversation {}: {}",
                        conversation_id, persist_error
                    );
                }
                turn.advance(TurnState::Errored);
                let _ = turn.events.send(ChatEvent::Failed(AppError::Upstream(e)));
            }
            (UpstreamOutcome::Completed(_), Err(e)) => {
                error!("Failed to persist reply for conversation {}: {}", conversation_id, e);
                turn.advance(TurnState::Errored);
                let _ = turn.events.send(ChatEvent::Failed(e));
            }
            (UpstreamOutcome::Completed(_), Ok(message_id)) => {
                if message_id.is_some() {
                    self.spawn_followups(&turn.conversation, first_reply);
                }
                turn.advance(TurnState::Done);
                let _ = turn.events.send(ChatEvent::Done {
                    conversation_id,
                    message_id,
                    usage,
                });
            }
        }
    }

    /// Relay the reply, appending to `delivered` exactly what reached the channel.
    async fn call_upstream(&self, turn: &Turn, prompt: &[ChatMessage], delivered: &mut String) -> UpstreamOutcome {
        let model = turn.model.id.as_str();
        let options = turn.options;
        let events = &turn.events;

        match turn.mode {
            ResponseMode::Streamed => {
                let sender = events.clone();
                let mut on_chunk = |chunk: &str| {
                    if sender.send(ChatEvent::Chunk(chunk.to_string())).is_ok() {
                        delivered.push_str(chunk);
                        true
                    } else {
                        false
                    }
                };

                tokio::select! {
                    result = self.upstream.complete_streamed(model, prompt, options, &mut on_chunk) => match result {
                        Ok(summary) if summary.stopped_early => UpstreamOutcome::Cancelled,
                        Ok(summary) => UpstreamOutcome::Completed(summary.usage),
                        Err(e) => UpstreamOutcome::Failed(e),
                    },
                    _ = events.closed() => UpstreamOutcome::Cancelled,
                }
            }
            ResponseMode::Buffered => {
                tokio::select! {
                    result = self.upstream.complete_buffered(model, prompt, options) => match result {
                        Ok(completion) => {
                            if !completion.content.is_empty() {
                                if events.send(ChatEvent::Chunk(completion.content.clone())).is_err() {
                                    return UpstreamOutcome::Cancelled;
                                }
                                delivered.push_str(&completion.content);
                            }
                            UpstreamOutcome::Completed(completion.usage)
                        }
                        Err(e) => UpstreamOutcome::Failed(e),
                    },
                    _ = events.closed() => UpstreamOutcome::Cancelled,
                }
            }
        }
    }

    /// Store the reply (if any) and bump counters. Returns the assistant message id.
    async fn persist(&self, turn: &Turn, delivered: &str, usage: TokenUsage) -> Result<Option<i64>, AppError> {
        let conversation_id = turn.conversation.id;

        let message_id = if delivered.is_empty() {
            None
        } else {
            let message = self
                .store
                .append_message(conversation_id, Role::Assistant, delivered)
                .await?;
            Some(message.id)
        };

        let new_messages = if message_id.is_some() { 2 } else { 1 };
        let tokens = i64::from(usage.total_tokens);

        self.store
            .update_usage_counters(conversation_id, new_messages, tokens)
            .await?;
        self.users.add_user_usage(turn.user.id, tokens).await?;

        debug!(
            "Persisted turn on conversation {}: {} messages, {} tokens",
            conversation_id, new_messages, tokens
        );
        Ok(message_id)
    }

    /// Title generation runs after the first assistant reply only.
    fn spawn_followups(&self, conversation: &Conversation, first_reply: bool) {
        if first_reply && conversation.wants_generated_title() {
            let orchestrator = self.clone();
            let conversation_id = conversation.id;
            tokio::spawn(async move {
                if let Err(e) = orchestrator.generate_title(conversation_id).await {
                    warn!("Title generation failed for conversation {}: {}", conversation_id, e);
                }
            });
        }

        if self.config.auto_classify && conversation.category_id.is_none() {
            let orchestrator = self.clone();
            let user_id = conversation.user_id;
            let conversation_id = conversation.id;
            tokio::spawn(async move {
                if let Err(e) = orchestrator.auto_classify(user_id, conversation_id).await {
                    debug!("Auto-classification skipped for conversation {}: {}", conversation_id, e);
                }
            });
        }
    }

    async fn generate_title(&self, conversation_id: i64) -> Result<Option<String>, AppError> {
        let model = self
            .catalog
            .background_model()
            .ok_or_else(|| AppError::Config("no free-tier model for title generation".to_string()))?;

        let history = self.store.load_history(conversation_id, Some(self.config.history_limit)).await?;
        let title = background::generate_title(
            self.upstream.as_ref(),
            &model.id,
            &history,
            self.config.title_max_chars,
        )
        .await?;

        let Some(title) = title else {
            info!("Generated title for conversation {} was empty", conversation_id);
            return Ok(None);
        };

        if self.store.set_generated_title(conversation_id, &title).await? {
            info!("Generated title '{}' for conversation {}", title, conversation_id);
            Ok(Some(title))
        } else {
            debug!("Conversation {} was renamed meanwhile, keeping the manual title", conversation_id);
            Ok(None)
        }
    }

    /// Regenerate the title of an owned conversation in the background.
    pub async fn regenerate_title(&self, user_id: Uuid, conversation_id: i64) -> Result<(), AppError> {
        let conversation = self.store.get_conversation(user_id, conversation_id).await?;
        if conversation.message_count == 0 {
            return Ok(());
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.generate_title(conversation_id).await {
                warn!("Title regeneration failed for conversation {}: {}", conversation_id, e);
            }
        });
        Ok(())
    }

    /// Let the background model file the conversation under one of the user's categories.
    pub async fn auto_classify(&self, user_id: Uuid, conversation_id: i64) -> Result<Conversation, AppError> {
        let conversation = self.store.get_conversation(user_id, conversation_id).await?;
        let history = self.store.load_history(conversation_id, Some(self.config.history_limit)).await?;
        let categories = self.store.list_categories(user_id).await?;

        let model = self
            .catalog
            .background_model()
            .ok_or_else(|| AppError::Config("no free-tier model for classification".to_string()))?;

        match background::choose_category(self.upstream.as_ref(), &model.id, &history, &categories).await? {
            Some(category_id) => {
                info!("Classified conversation {} into category {}", conversation_id, category_id);
                self.store.set_category(user_id, conversation_id, Some(category_id)).await
            }
            None => {
                warn!("Classifier gave no usable category for conversation {}", conversation_id);
                Ok(conversation)
            }
        }
    }
}
