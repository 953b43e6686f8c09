use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use crate::catalog::{Axis, ParameterSelection};
use crate::error::{GenerationError, SessionError};

use super::message::{ChatMessage, MessageId};
use super::observer::{Observer, Observers, SessionEvent, SubscriptionId, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one text submission. Completions presenting a token that is not the
/// in-flight one are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionToken {
    session: SessionId,
    seq: u64,
}

impl SubmissionToken {
    pub fn session_id(&self) -> SessionId {
        self.session
    }
}

/// Identifies one image generation for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageToken {
    session: SessionId,
    message_id: MessageId,
}

impl ImageToken {
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }
}

/// In-memory state of one chat session.
///
/// The message log is append-only. At most one text submission is in flight, and at
/// most one image generation per message.
pub struct SessionState {
    id: SessionId,
    messages: Vec<ChatMessage>,
    selection: ParameterSelection,
    in_flight: Option<SubmissionToken>,
    next_seq: u64,
    last_error: Option<GenerationError>,
    pending_images: BTreeSet<MessageId>,
    observers: Observers,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("messages", &self.messages.len())
            .field("selection", &self.selection)
            .field("submitting", &self.is_submitting())
            .field("last_error", &self.last_error)
            .field("pending_images", &self.pending_images)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_selection(ParameterSelection::default())
    }

    pub fn with_selection(selection: ParameterSelection) -> Self {
        Self {
            id: SessionId::new(),
            messages: Vec::new(),
            selection,
            in_flight: None,
            next_seq: 0,
            last_error: None,
            pending_images: BTreeSet::new(),
            observers: Observers::default(),
        }
    }

    /// Ends this session and starts an empty one that keeps the current selection and
    /// subscribers. Tokens issued by this session no longer match anything.
    pub fn successor(&mut self) -> SessionState {
        let mut next = SessionState::with_selection(self.selection.clone());
        next.observers = std::mem::take(&mut self.observers);
        next
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.is_assistant())
    }

    pub fn selection(&self) -> &ParameterSelection {
        &self.selection
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        self.last_error.as_ref()
    }

    pub fn is_generating_image(&self, message_id: MessageId) -> bool {
        self.pending_images.contains(&message_id)
    }

    pub fn pending_image_count(&self) -> usize {
        self.pending_images.len()
    }

    pub fn subscribe(&mut self, topic: Topic, observer: Observer) -> SubscriptionId {
        self.observers.subscribe(topic, observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Sets one axis. Values are checked against the catalog at submission time, not here.
    pub fn select_parameter(&mut self, axis: Axis, value: Option<&str>) {
        self.selection.set(axis, value);
        let value = self.selection.get(axis).map(str::to_string);
        self.observers
            .notify(&SessionEvent::SelectionChanged { axis, value });
    }

    pub fn begin_submission(&mut self) -> Result<SubmissionToken, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::AlreadySubmitting);
        }
        self.next_seq += 1;
        let token = SubmissionToken {
            session: self.id,
            seq: self.next_seq,
        };
        self.in_flight = Some(token);
        self.observers.notify(&SessionEvent::SubmittingChanged(true));
        Ok(token)
    }

    /// Pushes `message` to the end of the log. A timestamp earlier than the previous
    /// entry's is raised to it, so the log is ordered by time as well as by position.
    pub fn append_message(&mut self, mut message: ChatMessage) -> MessageId {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        let id = message.id;
        self.messages.push(message.clone());
        self.observers.notify(&SessionEvent::MessageAppended(message));
        id
    }

    /// Clears the in-flight flag. Returns `false` without touching state when `token`
    /// is not the current submission.
    pub fn complete_submission(&mut self, token: SubmissionToken) -> bool {
        if self.in_flight != Some(token) {
            return false;
        }
        self.in_flight = None;
        self.last_error = None;
        self.observers.notify(&SessionEvent::SubmittingChanged(false));
        true
    }

    /// Clears the in-flight flag and records `error`. Messages already appended stay.
    pub fn fail_submission(&mut self, token: SubmissionToken, error: GenerationError) -> bool {
        if self.in_flight != Some(token) {
            return false;
        }
        self.in_flight = None;
        self.last_error = Some(error.clone());
        self.observers.notify(&SessionEvent::SubmittingChanged(false));
        self.observers.notify(&SessionEvent::ErrorRecorded(error));
        true
    }

    /// Marks an image generation in flight for an assistant message.
    pub fn begin_image(&mut self, message_id: MessageId) -> Result<ImageToken, SessionError> {
        let message = self
            .message(message_id)
            .ok_or(SessionError::UnknownMessage(message_id))?;
        if !message.is_assistant() {
            return Err(SessionError::NotAssistantMessage(message_id));
        }
        if !self.pending_images.insert(message_id) {
            return Err(SessionError::ImageAlreadyPending(message_id));
        }
        self.observers.notify(&SessionEvent::ImagePendingChanged {
            message_id,
            pending: true,
        });
        Ok(ImageToken {
            session: self.id,
            message_id,
        })
    }

    /// Releases the per-message image guard. Returns `false` for tokens from another
    /// session or for a message with nothing in flight.
    pub fn finish_image(&mut self, token: ImageToken) -> bool {
        if token.session != self.id || !self.pending_images.remove(&token.message_id) {
            return false;
        }
        self.observers.notify(&SessionEvent::ImagePendingChanged {
            message_id: token.message_id,
            pending: false,
        });
        true
    }

    pub fn owns_submission(&self, token: &SubmissionToken) -> bool {
        self.in_flight.as_ref() == Some(token)
    }

    pub fn owns_image(&self, token: &ImageToken) -> bool {
        token.session == self.id && self.pending_images.contains(&token.message_id)
    }

    /// Records an error that did not come from a text submission.
    pub fn record_error(&mut self, error: GenerationError) {
        self.last_error = Some(error.clone());
        self.observers.notify(&SessionEvent::ErrorRecorded(error));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::Duration;

    use super::*;

    fn recorder(session: &mut SessionState, topic: Topic) -> Rc<RefCell<Vec<SessionEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        session.subscribe(
            topic,
            Box::new(move |event: &SessionEvent| sink.borrow_mut().push(event.clone())),
        );
        seen
    }

    #[test]
    fn append_is_ordered_and_never_rewrites_entries() {
        let mut session = SessionState::new();
        let mut appended = Vec::new();
        for idx in 0..5 {
            let message = ChatMessage::user(format!("m{idx}"));
            appended.push(message.clone());
            session.append_message(message);
            assert_eq!(session.messages()[..appended.len() - 1], appended[..appended.len() - 1]);
        }
        assert_eq!(session.messages().len(), 5);
        let texts: Vec<&str> = session.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn append_keeps_timestamps_non_decreasing() {
        let mut session = SessionState::new();
        let first = ChatMessage::user("later");
        let mut second = ChatMessage::assistant("earlier");
        second.timestamp = first.timestamp - Duration::seconds(5);
        session.append_message(first.clone());
        session.append_message(second);
        assert_eq!(session.messages()[1].timestamp, first.timestamp);
    }

    #[test]
    fn second_begin_fails_and_leaves_state_unchanged() {
        let mut session = SessionState::new();
        let token = session.begin_submission().unwrap();
        assert_eq!(
            session.begin_submission(),
            Err(SessionError::AlreadySubmitting)
        );
        assert!(session.is_submitting());
        assert!(session.owns_submission(&token));
        assert!(session.complete_submission(token));
        assert!(!session.is_submitting());
    }

    #[test]
    fn stale_completion_is_a_no_op() {
        let mut session = SessionState::new();
        let stale = session.begin_submission().unwrap();
        assert!(session.complete_submission(stale));
        let current = session.begin_submission().unwrap();

        assert!(!session.complete_submission(stale));
        assert!(!session.fail_submission(stale, GenerationError::request_failed("late")));
        assert!(session.is_submitting());
        assert!(session.last_error().is_none());

        assert!(session.complete_submission(current));
    }

    #[test]
    fn failure_records_error_without_rolling_back() {
        let mut session = SessionState::new();
        session.append_message(ChatMessage::user("kept"));
        let token = session.begin_submission().unwrap();
        let error = GenerationError::missing_payload("response");
        assert!(session.fail_submission(token, error.clone()));
        assert_eq!(session.last_error(), Some(&error));
        assert_eq!(session.messages().len(), 1);
        assert!(!session.is_submitting());
    }

    #[test]
    fn observers_only_see_their_topic() {
        let mut session = SessionState::new();
        let messages = recorder(&mut session, Topic::Messages);
        let submitting = recorder(&mut session, Topic::Submitting);
        let selection = recorder(&mut session, Topic::Selection);

        session.select_parameter(Axis::Biome, Some("Forest"));
        let token = session.begin_submission().unwrap();
        session.append_message(ChatMessage::user("hi"));
        session.complete_submission(token);

        assert_eq!(messages.borrow().len(), 1);
        assert_eq!(
            *submitting.borrow(),
            vec![
                SessionEvent::SubmittingChanged(true),
                SessionEvent::SubmittingChanged(false)
            ]
        );
        assert_eq!(
            *selection.borrow(),
            vec![SessionEvent::SelectionChanged {
                axis: Axis::Biome,
                value: Some("Forest".to_string()),
            }]
        );
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let mut session = SessionState::new();
        let seen = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&seen);
        let id = session.subscribe(
            Topic::Messages,
            Box::new(move |_: &SessionEvent| *sink.borrow_mut() += 1),
        );
        session.append_message(ChatMessage::user("one"));
        assert!(session.unsubscribe(id));
        assert!(!session.unsubscribe(id));
        session.append_message(ChatMessage::user("two"));
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn image_guard_is_per_message() {
        let mut session = SessionState::new();
        let user = session.append_message(ChatMessage::user("q"));
        let first = session.append_message(ChatMessage::assistant("a1"));
        let second = session.append_message(ChatMessage::assistant("a2"));

        assert_eq!(
            session.begin_image(user),
            Err(SessionError::NotAssistantMessage(user))
        );
        let token = session.begin_image(first).unwrap();
        assert_eq!(
            session.begin_image(first),
            Err(SessionError::ImageAlreadyPending(first))
        );
        let other = session.begin_image(second).unwrap();
        assert!(session.is_generating_image(first));
        assert_eq!(session.pending_image_count(), 2);

        let begin = session.begin_submission();
        assert!(begin.is_ok(), "image generation must not block text submission");

        assert!(session.finish_image(token));
        assert!(!session.finish_image(token));
        assert!(!session.is_generating_image(first));
        assert!(session.finish_image(other));
        assert_eq!(session.pending_image_count(), 0);
    }

    #[test]
    fn successor_invalidates_tokens_and_keeps_subscribers() {
        let mut session = SessionState::new();
        session.select_parameter(Axis::Choice, Some("NPC"));
        let assistant = session.append_message(ChatMessage::assistant("a"));
        let image = session.begin_image(assistant).unwrap();
        let token = session.begin_submission().unwrap();
        let seen = recorder(&mut session, Topic::Messages);

        let mut next = session.successor();
        assert_ne!(next.id(), session.id());
        assert!(next.messages().is_empty());
        assert_eq!(next.selection().get(Axis::Choice), Some("NPC"));
        assert!(!next.complete_submission(token));
        assert!(!next.finish_image(image));
        assert!(!next.is_submitting());

        next.append_message(ChatMessage::user("fresh"));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn unknown_message_cannot_start_an_image() {
        let mut session = SessionState::new();
        let id = MessageId::new();
        assert_eq!(session.begin_image(id), Err(SessionError::UnknownMessage(id)));
    }
}
