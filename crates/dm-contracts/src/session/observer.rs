use crate::catalog::Axis;
use crate::error::GenerationError;

use super::message::{ChatMessage, MessageId};

/// Slice of session state a view can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Submitting,
    Selection,
    Images,
    Errors,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(ChatMessage),
    SubmittingChanged(bool),
    SelectionChanged {
        axis: Axis,
        value: Option<String>,
    },
    ImagePendingChanged {
        message_id: MessageId,
        pending: bool,
    },
    ErrorRecorded(GenerationError),
}

impl SessionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SessionEvent::MessageAppended(_) => Topic::Messages,
            SessionEvent::SubmittingChanged(_) => Topic::Submitting,
            SessionEvent::SelectionChanged { .. } => Topic::Selection,
            SessionEvent::ImagePendingChanged { .. } => Topic::Images,
            SessionEvent::ErrorRecorded(_) => Topic::Errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Observer = Box<dyn FnMut(&SessionEvent)>;

#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Topic, Observer)>,
}

impl Observers {
    pub(crate) fn subscribe(&mut self, topic: Topic, observer: Observer) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, topic, observer));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _, _)| *existing != id);
        self.entries.len() != before
    }

    pub(crate) fn notify(&mut self, event: &SessionEvent) {
        let topic = event.topic();
        for (_, subscribed, observer) in self.entries.iter_mut() {
            if *subscribed == topic {
                observer(event);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
