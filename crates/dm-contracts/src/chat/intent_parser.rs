use crate::catalog::Axis;
use crate::feedback::Rating;

use super::command_registry::{
    find_action, CommandKind, AXIS_COMMANDS, IMAGE_COMMAND, NO_ARG_COMMANDS, OPTIONS_COMMAND,
    RATE_DOWN_COMMAND, RATE_UP_COMMAND,
};

/// What one line of chat input asks for. Message references are 1-based positions in
/// the session log as rendered by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Noop,
    Submit {
        text: String,
    },
    SetParameter {
        axis: Axis,
        value: Option<String>,
    },
    ShowSettings,
    ListOptions {
        axis: Option<Axis>,
    },
    GenerateImage {
        target: Option<usize>,
    },
    Rate {
        target: usize,
        rating: Rating,
        reason: Option<String>,
    },
    History,
    NewSession,
    Health,
    Help,
    Quit,
    Invalid {
        command: String,
        reason: String,
    },
    Unknown {
        command: String,
        arg: String,
    },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_position(raw: &str) -> Option<usize> {
    raw.trim()
        .trim_start_matches('#')
        .parse::<usize>()
        .ok()
        .filter(|value| *value > 0)
}

fn invalid(command: &str, reason: impl Into<String>) -> Intent {
    Intent::Invalid {
        command: command.to_string(),
        reason: reason.into(),
    }
}

fn parse_rate(command: &str, rating: Rating, arg: &str) -> Intent {
    let parts = split_args(arg);
    let Some(target) = parts.first().and_then(|raw| parse_position(raw)) else {
        return invalid(command, format!("/{command} requires a message number"));
    };
    let reason = parts[1..].join(" ");
    Intent::Rate {
        target,
        rating,
        reason: (!reason.is_empty()).then_some(reason),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(axis) = find_action(&command, AXIS_COMMANDS) {
                let value = split_args(arg).join(" ");
                return Intent::SetParameter {
                    axis,
                    value: (!value.is_empty()).then_some(value),
                };
            }

            if let Some(kind) = find_action(&command, NO_ARG_COMMANDS) {
                return match kind {
                    CommandKind::Settings => Intent::ShowSettings,
                    CommandKind::History => Intent::History,
                    CommandKind::NewSession => Intent::NewSession,
                    CommandKind::Health => Intent::Health,
                    CommandKind::Help => Intent::Help,
                    CommandKind::Quit => Intent::Quit,
                };
            }

            if command == OPTIONS_COMMAND {
                if arg.is_empty() {
                    return Intent::ListOptions { axis: None };
                }
                return match Axis::parse(arg) {
                    Some(axis) => Intent::ListOptions { axis: Some(axis) },
                    None => invalid(&command, format!("unknown axis '{arg}'")),
                };
            }

            if command == IMAGE_COMMAND {
                if arg.is_empty() {
                    return Intent::GenerateImage { target: None };
                }
                return match parse_position(arg) {
                    Some(target) => Intent::GenerateImage {
                        target: Some(target),
                    },
                    None => invalid(&command, "/image takes a message number"),
                };
            }

            if command == RATE_UP_COMMAND {
                return parse_rate(&command, Rating::Up, arg);
            }
            if command == RATE_DOWN_COMMAND {
                return parse_rate(&command, Rating::Down, arg);
            }

            return Intent::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    Intent::Submit {
        text: raw_trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_submits_trimmed() {
        assert_eq!(
            parse_intent("  Create a blacksmith \n"),
            Intent::Submit {
                text: "Create a blacksmith".to_string()
            }
        );
        assert_eq!(parse_intent("   "), Intent::Noop);
    }

    #[test]
    fn axis_commands_keep_multi_word_values() {
        assert_eq!(
            parse_intent("/constriction No Wind"),
            Intent::SetParameter {
                axis: Axis::Constriction,
                value: Some("No Wind".to_string()),
            }
        );
        assert_eq!(
            parse_intent("/STYLE \"Descriptive\""),
            Intent::SetParameter {
                axis: Axis::TextStyle,
                value: Some("Descriptive".to_string()),
            }
        );
        assert_eq!(
            parse_intent("/biome"),
            Intent::SetParameter {
                axis: Axis::Biome,
                value: None,
            }
        );
    }

    #[test]
    fn options_and_image_arguments() {
        assert_eq!(parse_intent("/options"), Intent::ListOptions { axis: None });
        assert_eq!(
            parse_intent("/options text style"),
            Intent::ListOptions {
                axis: Some(Axis::TextStyle)
            }
        );
        assert!(matches!(parse_intent("/options weather"), Intent::Invalid { .. }));
        assert_eq!(parse_intent("/image"), Intent::GenerateImage { target: None });
        assert_eq!(
            parse_intent("/image #4"),
            Intent::GenerateImage { target: Some(4) }
        );
        assert!(matches!(parse_intent("/image 0"), Intent::Invalid { .. }));
    }

    #[test]
    fn rating_commands_take_position_and_reason() {
        assert_eq!(
            parse_intent("/down 2 \"too long\" really"),
            Intent::Rate {
                target: 2,
                rating: Rating::Down,
                reason: Some("too long really".to_string()),
            }
        );
        assert_eq!(
            parse_intent("/up 3"),
            Intent::Rate {
                target: 3,
                rating: Rating::Up,
                reason: None,
            }
        );
        assert!(matches!(parse_intent("/up"), Intent::Invalid { .. }));
    }

    #[test]
    fn no_arg_and_unknown_commands() {
        assert_eq!(parse_intent("/settings"), Intent::ShowSettings);
        assert_eq!(parse_intent("/exit"), Intent::Quit);
        assert_eq!(parse_intent("/new"), Intent::NewSession);
        assert_eq!(
            parse_intent("/roll 2d6"),
            Intent::Unknown {
                command: "roll".to_string(),
                arg: "2d6".to_string(),
            }
        );
        assert_eq!(
            parse_intent("/ not a command"),
            Intent::Submit {
                text: "/ not a command".to_string()
            }
        );
    }
}
