//! Generation backend client and the chat engine that drives a [`SessionState`]
//! through text submissions, image generations, ratings and resets.

pub mod client;
pub mod transport;

use anyhow::{bail, Result};
use dm_contracts::events::{EventKind, EventPayload, EventWriter};
use dm_contracts::feedback::{FeedbackWriter, Rating};
use dm_contracts::session::{ImageToken, SessionId, SubmissionToken};
use dm_contracts::{
    Axis, ChatMessage, ComposeError, GenerationError, ImageAttachment, MessageId,
    OptionCatalog, PromptTemplate, SessionError, SessionState,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub use client::{
    decode_image_payload, normalize_api_base, ClientConfig, GenerationClient, HealthStatus,
    ImageDefaults, DEFAULT_API_BASE,
};
pub use transport::{HttpTransport, Transport, TransportResponse};

pub const IMAGE_MESSAGE_PREFIX: &str = "Generated image based on: ";

/// Why a submission did not produce an assistant message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    EmptyMessage,

    /// Every set value the catalog does not list, in catalog order.
    #[error("Unknown option values: {}", describe_unknown(.0))]
    UnknownOption(Vec<(Axis, String)>),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl SubmitError {
    /// Text for the chat view. Generation failures collapse to one generic notice; the
    /// detail goes to the log instead.
    pub fn user_notice(&self) -> String {
        match self {
            SubmitError::EmptyMessage => "Please enter a message.".to_string(),
            SubmitError::Generation(err) => err.user_notice().to_string(),
            other => other.to_string(),
        }
    }
}

fn describe_unknown(unknown: &[(Axis, String)]) -> String {
    unknown
        .iter()
        .map(|(axis, value)| format!("{} `{value}`", axis.label()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of applying a completion to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    Delivered(T),
    /// The completion belonged to a session that has since been reset.
    Discarded,
}

/// A text submission that has claimed the session's in-flight slot.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    token: SubmissionToken,
    user_text: String,
    prompt: String,
}

impl PendingSubmission {
    pub fn token(&self) -> SubmissionToken {
        self.token
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn send(&self, client: &GenerationClient) -> Result<String, GenerationError> {
        client.generate_text(&self.user_text, &self.prompt)
    }
}

/// An image generation claimed for one assistant message.
#[derive(Debug, Clone)]
pub struct PendingImage {
    token: ImageToken,
    prompt: String,
}

impl PendingImage {
    pub fn token(&self) -> ImageToken {
        self.token
    }

    pub fn message_id(&self) -> MessageId {
        self.token.message_id()
    }

    /// The source message's text, sent as-is.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn send(&self, client: &GenerationClient) -> Result<ImageAttachment, GenerationError> {
        client.generate_image(&self.prompt)
    }
}

pub struct ChatEngine {
    client: GenerationClient,
    catalog: OptionCatalog,
    template: PromptTemplate,
    session: SessionState,
    events: Option<EventWriter>,
    feedback: Option<FeedbackWriter>,
}

impl ChatEngine {
    pub fn new(client: GenerationClient) -> Self {
        Self {
            client,
            catalog: OptionCatalog::default(),
            template: PromptTemplate::default(),
            session: SessionState::new(),
            events: None,
            feedback: None,
        }
    }

    pub fn with_catalog(mut self, catalog: OptionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Binds `events` to the current session and records `session_started`.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events.for_session(self.session.id().to_string()));
        self.emit(
            EventKind::SessionStarted,
            json!({
                "api_base": self.client.config().api_base,
                "reset": false,
            }),
        );
        self
    }

    pub fn with_feedback(mut self, feedback: FeedbackWriter) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn catalog(&self) -> &OptionCatalog {
        &self.catalog
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    /// Message at a 1-based position in the log.
    pub fn message_at(&self, position: usize) -> Option<&ChatMessage> {
        position
            .checked_sub(1)
            .and_then(|idx| self.session.messages().get(idx))
    }

    /// Sets `axis` from user input, resolved against the catalog by value or label.
    /// `None` or blank input clears the axis.
    pub fn select(
        &mut self,
        axis: Axis,
        input: Option<&str>,
    ) -> Result<Option<String>, SubmitError> {
        let value = match input.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => None,
            Some(raw) => {
                let resolved = self.catalog.resolve(axis, raw).ok_or_else(|| {
                    SubmitError::UnknownOption(vec![(axis, raw.to_string())])
                })?;
                Some(resolved.to_string())
            }
        };
        self.session.select_parameter(axis, value.as_deref());
        self.emit(
            EventKind::ParameterSelected,
            json!({
                "axis": axis.key(),
                "value": value,
            }),
        );
        Ok(value)
    }

    /// Composes the prompt for `user_text` from the current selection without
    /// touching the session. Missing required axes are reported before off-catalog
    /// values.
    pub fn compose(&self, user_text: &str) -> Result<String, SubmitError> {
        let selection = self.session.selection();
        let prompt = self.template.compose(selection, user_text)?;
        selection
            .validate(&self.catalog)
            .map_err(SubmitError::UnknownOption)?;
        Ok(prompt)
    }

    /// Validates and composes, then claims the in-flight slot. Nothing changes in the
    /// session when this fails.
    pub fn prepare_submission(
        &mut self,
        user_text: &str,
    ) -> Result<PendingSubmission, SubmitError> {
        if user_text.trim().is_empty() {
            return Err(SubmitError::EmptyMessage);
        }
        let prompt = self.compose(user_text)?;
        let token = self.session.begin_submission()?;
        self.emit(
            EventKind::SubmissionStarted,
            json!({
                "user_chars": user_text.chars().count(),
                "prompt_chars": prompt.chars().count(),
            }),
        );
        Ok(PendingSubmission {
            token,
            user_text: user_text.to_string(),
            prompt,
        })
    }

    /// Applies a text completion. On success the user message and the assistant reply
    /// are appended together; on failure nothing is appended and the error is kept as
    /// the session's last error.
    pub fn finish_submission(
        &mut self,
        pending: PendingSubmission,
        outcome: Result<String, GenerationError>,
    ) -> Result<Delivery<MessageId>, GenerationError> {
        if !self.session.owns_submission(&pending.token) {
            log::debug!(
                "discarding completion for session {}",
                pending.token.session_id()
            );
            self.emit(
                EventKind::SubmissionDiscarded,
                json!({
                    "stale_session_id": pending.token.session_id().to_string(),
                    "ok": outcome.is_ok(),
                }),
            );
            return Ok(Delivery::Discarded);
        }

        match outcome {
            Ok(reply) => {
                let reply_chars = reply.chars().count();
                self.session.append_message(ChatMessage::user(pending.user_text));
                let reply_id = self.session.append_message(ChatMessage::assistant(reply));
                self.session.complete_submission(pending.token);
                self.emit(
                    EventKind::SubmissionCompleted,
                    json!({
                        "message_id": reply_id.to_string(),
                        "reply_chars": reply_chars,
                    }),
                );
                Ok(Delivery::Delivered(reply_id))
            }
            Err(err) => {
                log::warn!("text generation failed: {err}");
                self.session.fail_submission(pending.token, err.clone());
                self.emit(EventKind::SubmissionFailed, json!({ "error": err.to_string() }));
                Err(err)
            }
        }
    }

    /// Blocking submit: prepare, call the backend, apply the result.
    pub fn send_message(&mut self, user_text: &str) -> Result<Delivery<MessageId>, SubmitError> {
        let pending = self.prepare_submission(user_text)?;
        let outcome = pending.send(&self.client);
        Ok(self.finish_submission(pending, outcome)?)
    }

    pub fn prepare_image(&mut self, message_id: MessageId) -> Result<PendingImage, SessionError> {
        let token = self.session.begin_image(message_id)?;
        let prompt = self
            .session
            .message(message_id)
            .map(|message| message.text.clone())
            .unwrap_or_default();
        self.emit(
            EventKind::ImageRequested,
            json!({
                "message_id": message_id.to_string(),
                "prompt_chars": prompt.chars().count(),
            }),
        );
        Ok(PendingImage { token, prompt })
    }

    /// Applies an image completion: releases the message's guard and, on success,
    /// appends a new assistant message carrying the image.
    pub fn finish_image(
        &mut self,
        pending: PendingImage,
        outcome: Result<ImageAttachment, GenerationError>,
    ) -> Result<Delivery<MessageId>, GenerationError> {
        if !self.session.finish_image(pending.token) {
            log::debug!(
                "ignoring image for message {} from session {}",
                pending.message_id(),
                pending.token.session_id()
            );
            return Ok(Delivery::Discarded);
        }

        match outcome {
            Ok(image) => {
                let (width, height) = (image.width, image.height);
                let mime_type = image.mime_type.clone();
                let message = ChatMessage::assistant(format!(
                    "{IMAGE_MESSAGE_PREFIX}{}",
                    pending.prompt
                ))
                .with_image(image);
                let image_id = self.session.append_message(message);
                self.emit(
                    EventKind::ImageCompleted,
                    json!({
                        "source_message_id": pending.message_id().to_string(),
                        "message_id": image_id.to_string(),
                        "mime_type": mime_type,
                        "width": width,
                        "height": height,
                    }),
                );
                Ok(Delivery::Delivered(image_id))
            }
            Err(err) => {
                log::warn!("image generation failed: {err}");
                self.session.record_error(err.clone());
                self.emit(
                    EventKind::ImageFailed,
                    json!({
                        "source_message_id": pending.message_id().to_string(),
                        "error": err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    /// Blocking image generation for one assistant message.
    pub fn generate_image(
        &mut self,
        message_id: MessageId,
    ) -> Result<Delivery<MessageId>, SubmitError> {
        let pending = self.prepare_image(message_id)?;
        let outcome = pending.send(&self.client);
        Ok(self.finish_image(pending, outcome)?)
    }

    /// Records a thumbs up/down for an assistant message.
    pub fn rate(
        &self,
        message_id: MessageId,
        rating: Rating,
        reason: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let message = self
            .session
            .message(message_id)
            .ok_or(SessionError::UnknownMessage(message_id))?;
        if !message.is_assistant() {
            return Err(SessionError::NotAssistantMessage(message_id).into());
        }
        let Some(feedback) = &self.feedback else {
            bail!("feedback log is not configured");
        };
        let reason = reason.map(str::trim).filter(|value| !value.is_empty());
        let row = feedback.record(
            &self.session.id().to_string(),
            &message_id.to_string(),
            rating,
            reason,
        )?;
        self.emit(
            EventKind::MessageRated,
            json!({
                "message_id": message_id.to_string(),
                "rating": rating.as_str(),
                "reason": reason,
            }),
        );
        Ok(row)
    }

    /// Disposes the current session and starts an empty one with the same selection
    /// and subscribers. Completions still in flight for the old session are discarded
    /// when they arrive.
    pub fn reset_session(&mut self) -> SessionId {
        let previous = self.session.id();
        self.session = self.session.successor();
        let session_id = self.session.id().to_string();
        self.events = self
            .events
            .take()
            .map(|events| events.for_session(session_id));
        self.emit(
            EventKind::SessionStarted,
            json!({
                "api_base": self.client.config().api_base,
                "reset": true,
                "previous_session_id": previous.to_string(),
            }),
        );
        self.session.id()
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, map_object(payload)) {
            log::warn!("failed to write {kind} event: {err:#}");
        }
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
