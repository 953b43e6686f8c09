mod message;
mod observer;
mod state;

pub use message::{ChatMessage, ImageAttachment, MessageId, Sender};
pub use observer::{Observer, SessionEvent, SubscriptionId, Topic};
pub use state::{ImageToken, SessionId, SessionState, SubmissionToken};
