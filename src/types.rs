use std::fmt;

use serde::Deserialize;

/// What to do once a stalled task crosses the final hang threshold.
///
/// Every threshold crossing is journaled regardless of the action; the action
/// only decides what happens at the last one.
///
/// - `Warn`: journal warnings only, the process is left alone.
/// - `Dump`: request one diagnostic dump. The task becomes `Dumped` and may
///   still finish on its own.
/// - `DumpThenTerminate`: request a dump, then terminate the process once the
///   dump is collected (or failed).
/// - `Terminate`: terminate the process without a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangAction {
    Warn,
    Dump,
    DumpThenTerminate,
    Terminate,
}

impl HangAction {
    pub fn terminates(self) -> bool {
        matches!(self, HangAction::DumpThenTerminate | HangAction::Terminate)
    }
}

impl Default for HangAction {
    fn default() -> Self {
        HangAction::Dump
    }
}

impl fmt::Display for HangAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HangAction::Warn => "warn",
            HangAction::Dump => "dump",
            HangAction::DumpThenTerminate => "dump_then_terminate",
            HangAction::Terminate => "terminate",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminating_actions_terminate() {
        assert!(!HangAction::Warn.terminates());
        assert!(!HangAction::Dump.terminates());
        assert!(HangAction::DumpThenTerminate.terminates());
        assert!(HangAction::Terminate.terminates());
    }

    #[test]
    fn displays_config_spelling() {
        assert_eq!(HangAction::DumpThenTerminate.to_string(), "dump_then_terminate");
        assert_eq!(HangAction::default().to_string(), "dump");
    }
}
