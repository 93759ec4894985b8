use crate::insights::InsightKind;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: "upload",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const INSIGHT_ACTION: &str = "insight";

pub(crate) fn find_insight(command: &str) -> Option<InsightKind> {
    InsightKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == command)
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload",
    "/analyze",
    "/causes",
    "/precautions",
    "/future_medications",
    "/eli5",
    "/medication_overview",
    "/status",
    "/help",
    "/quit",
];
