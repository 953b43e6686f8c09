//! Data, state and composition for the Dungeon Master chat client: the option
//! catalog, the prompt composer, the session log and the chat command grammar.

pub mod catalog;
pub mod chat;
pub mod error;
pub mod events;
pub mod feedback;
pub mod prompt;
pub mod session;

pub use catalog::{Axis, CatalogOption, OptionCatalog, ParameterSelection};
pub use error::{ComposeError, GenerationError, SessionError};
pub use prompt::{compose_prompt, PromptTemplate};
pub use session::{ChatMessage, ImageAttachment, MessageId, Sender, SessionState};
