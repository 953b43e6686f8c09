//! Composition of the instruction string sent to the text-generation endpoint.

use crate::catalog::{Axis, ParameterSelection};
use crate::error::ComposeError;

/// Wrapper tokens around the settings block and the user's text.
///
/// The defaults follow the Llama-2 chat convention the backend expects. They are
/// transport framing, so callers targeting another model family can replace them
/// without touching composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub open: String,
    pub preamble: String,
    pub system_close: String,
    pub instruction_close: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            open: "<s>[INST] <<SYS>>".to_string(),
            preamble: "I assume role as DM generating content with the following settings:"
                .to_string(),
            system_close: "<</SYS>>".to_string(),
            instruction_close: "[/INST]".to_string(),
        }
    }
}

impl PromptTemplate {
    /// Renders `selection` and `user_text` into one prompt.
    ///
    /// Fails with every missing required axis at once. An unset constriction drops
    /// its block from the settings.
    pub fn compose(
        &self,
        selection: &ParameterSelection,
        user_text: &str,
    ) -> Result<String, ComposeError> {
        let missing = selection.missing_required();
        if !missing.is_empty() {
            return Err(ComposeError::MissingParameter(missing));
        }

        let settings = Axis::ALL
            .into_iter()
            .filter_map(|axis| {
                selection
                    .get(axis)
                    .map(|value| format!("{}:\n- {value}", axis.label()))
            })
            .collect::<Vec<String>>()
            .join("\n\n");
        let style = selection.get(Axis::TextStyle).unwrap_or_default();

        Ok(format!(
            "{open}\n{preamble}\n\n{settings}\n{system_close}\n\n{user_text}\n\nStyle: {style} {instruction_close}",
            open = self.open,
            preamble = self.preamble,
            system_close = self.system_close,
            instruction_close = self.instruction_close,
        ))
    }
}

/// [`PromptTemplate::compose`] with the default template.
pub fn compose_prompt(
    selection: &ParameterSelection,
    user_text: &str,
) -> Result<String, ComposeError> {
    PromptTemplate::default().compose(selection, user_text)
}
