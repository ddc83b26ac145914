//! Dialogue engine — walks a user through the field catalog and hands the
//! collected answers to the renderer.
//!
//! States per user: no session, or awaiting the field under the cursor.
//! `/start` and `/cancel` are the only reserved inputs; everything else is
//! an answer.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::catalog::FieldCatalog;
use super::replies;
use super::session::{Answers, Session, SessionGuard, SessionStore, UserId};
use crate::channels::{Gateway, IncomingMessage};
use crate::config::BotConfig;
use crate::render::TemplateRenderer;

/// Reserved chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
}

impl Command {
    /// Recognize `/start` and `/cancel`, also in the `/start@BotName` form
    /// used in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let name = match text.split_once('@') {
            Some((name, bot)) if !bot.is_empty() && !bot.contains(char::is_whitespace) => name,
            Some(_) => return None,
            None => text,
        };

        match name {
            "/start" => Some(Self::Start),
            "/cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// What a single inbound message did to the user's dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A fresh session was created (any previous one discarded).
    Started,
    /// The session (if any) was removed on request.
    Cancelled,
    /// Text arrived without a session; nothing changed.
    NoSession,
    /// An answer was stored; `cursor` is the next field to ask for.
    Answered { cursor: usize },
    /// All fields answered and the document was rendered and sent.
    Completed,
    /// All fields answered but rendering failed; session discarded.
    RenderFailed,
    /// The cursor pointed past the catalog; session discarded.
    Expired,
}

/// Drives the question/answer dialogue for every user.
pub struct DialogueEngine {
    catalog: FieldCatalog,
    store: Arc<SessionStore>,
    renderer: TemplateRenderer,
    gateway: Arc<dyn Gateway>,
    document_name: String,
}

impl DialogueEngine {
    pub fn new(
        catalog: FieldCatalog,
        store: Arc<SessionStore>,
        renderer: TemplateRenderer,
        gateway: Arc<dyn Gateway>,
        document_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            renderer,
            gateway,
            document_name: document_name.into(),
        }
    }

    /// Build an engine from configuration: catalog, template path and
    /// document name.
    pub fn from_config(
        config: &BotConfig,
        store: Arc<SessionStore>,
        gateway: Arc<dyn Gateway>,
    ) -> crate::error::Result<Self> {
        let catalog = config.load_catalog()?;
        Ok(Self::new(
            catalog,
            store,
            TemplateRenderer::new(config.template_path.clone()),
            gateway,
            config.document_name.clone(),
        ))
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Apply one inbound message. The user's session stays locked until the
    /// transition, including its replies, has finished.
    pub async fn handle(&self, msg: IncomingMessage) -> Transition {
        let text = msg.text.trim();
        let mut session = self.store.lock(msg.user_id).await;

        let transition = match Command::parse(text) {
            Some(Command::Start) => self.start(&mut session).await,
            Some(Command::Cancel) => self.cancel(&mut session).await,
            None => self.answer(&mut session, text).await,
        };

        debug!(user_id = msg.user_id, ?transition, "Dialogue transition");
        self.store.release(session).await;
        transition
    }

    async fn start(&self, session: &mut SessionGuard) -> Transition {
        let user_id = session.user_id();
        if session.is_some() {
            info!(user_id, "Restarting session, previous answers discarded");
        }
        **session = Some(Session::new());

        let first = self.catalog.get(0).map_or("", |f| f.prompt.as_str());
        self.send_text(user_id, &replies::start(first)).await;
        Transition::Started
    }

    async fn cancel(&self, session: &mut SessionGuard) -> Transition {
        let user_id = session.user_id();
        if session.take().is_some() {
            info!(user_id, "Session cancelled");
        }
        self.send_text(user_id, replies::CANCELLED).await;
        Transition::Cancelled
    }

    async fn answer(&self, session: &mut SessionGuard, text: &str) -> Transition {
        let user_id = session.user_id();

        let Some(mut state) = session.take() else {
            self.send_text(user_id, replies::NO_SESSION).await;
            return Transition::NoSession;
        };

        let Some(field) = self.catalog.get(state.cursor) else {
            warn!(
                user_id,
                cursor = state.cursor,
                fields = self.catalog.len(),
                "Session cursor outside catalog, discarding session"
            );
            self.send_text(user_id, replies::SESSION_EXPIRED).await;
            return Transition::Expired;
        };

        state.record(&field.key, text);
        debug!(user_id, field = %field.key, cursor = state.cursor, "Answer recorded");

        match self.catalog.get(state.cursor) {
            Some(next) => {
                let cursor = state.cursor;
                **session = Some(state);
                self.send_text(user_id, &next.prompt).await;
                Transition::Answered { cursor }
            }
            None => self.complete(user_id, state.answers).await,
        }
    }

    /// Render and deliver the document. The session is already gone.
    async fn complete(&self, user_id: UserId, answers: Answers) -> Transition {
        match self.renderer.render(&answers).await {
            Ok(document) => {
                info!(user_id, bytes = document.len(), "Document rendered");
                if let Err(e) = self
                    .gateway
                    .send_document(user_id, document, &self.document_name)
                    .await
                {
                    warn!(user_id, gateway = self.gateway.name(), "Failed to deliver document: {e}");
                }
                self.send_text(user_id, replies::DONE).await;
                Transition::Completed
            }
            Err(e) => {
                error!(
                    user_id,
                    template = %self.renderer.template_path().display(),
                    "Document render failed: {e}"
                );
                self.send_text(user_id, &replies::render_failed(&e.to_string()))
                    .await;
                Transition::RenderFailed
            }
        }
    }

    async fn send_text(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.gateway.send_text(user_id, text).await {
            warn!(user_id, gateway = self.gateway.name(), "Failed to deliver message: {e}");
        }
    }
}
