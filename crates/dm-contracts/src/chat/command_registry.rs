use crate::catalog::Axis;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Settings,
    History,
    NewSession,
    Health,
    Help,
    Quit,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec<T: 'static> {
    pub command: &'static str,
    pub action: T,
}

pub(crate) const AXIS_COMMANDS: &[CommandSpec<Axis>] = &[
    CommandSpec {
        command: "choice",
        action: Axis::Choice,
    },
    CommandSpec {
        command: "biome",
        action: Axis::Biome,
    },
    CommandSpec {
        command: "features",
        action: Axis::Features,
    },
    CommandSpec {
        command: "constriction",
        action: Axis::Constriction,
    },
    CommandSpec {
        command: "style",
        action: Axis::TextStyle,
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec<CommandKind>] = &[
    CommandSpec {
        command: "settings",
        action: CommandKind::Settings,
    },
    CommandSpec {
        command: "history",
        action: CommandKind::History,
    },
    CommandSpec {
        command: "new",
        action: CommandKind::NewSession,
    },
    CommandSpec {
        command: "health",
        action: CommandKind::Health,
    },
    CommandSpec {
        command: "help",
        action: CommandKind::Help,
    },
    CommandSpec {
        command: "quit",
        action: CommandKind::Quit,
    },
    CommandSpec {
        command: "exit",
        action: CommandKind::Quit,
    },
];

pub(crate) const OPTIONS_COMMAND: &str = "options";
pub(crate) const IMAGE_COMMAND: &str = "image";
pub(crate) const RATE_UP_COMMAND: &str = "up";
pub(crate) const RATE_DOWN_COMMAND: &str = "down";

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/choice <value>",
    "/biome <value>",
    "/features <value>",
    "/constriction <value>",
    "/style <value>",
    "/settings",
    "/options [axis]",
    "/image [n]",
    "/up <n> [reason]",
    "/down <n> [reason]",
    "/history",
    "/new",
    "/health",
    "/help",
    "/quit",
];

pub(crate) fn find_action<T: Copy>(command: &str, specs: &[CommandSpec<T>]) -> Option<T> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}
