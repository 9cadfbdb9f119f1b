//! Stable numeric exit-code taxonomy shared by the CLI and the daemon.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ReturnCode {
    Success = 0,
    GeneralFailure = 1,
    TryAgain = 11,
    InvalidConfig = 130,
    InvalidAction = 131,
    ProgramDisabled = 132,
    ProgramUndefined = 133,
    ProgramExitedUnexpectedly = 134,
    UsrsvcdAlreadyRunning = 135,
    InsufficientPermissions = 136,
    ProgramFailedToLaunch = 137,
    HelpMessage = 138,
    UnknownFailure = 254,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            ReturnCode::Success => "SUCCESS",
            ReturnCode::GeneralFailure => "GENERAL_FAILURE",
            ReturnCode::TryAgain => "TRY_AGAIN",
            ReturnCode::InvalidConfig => "INVALID_CONFIG",
            ReturnCode::InvalidAction => "INVALID_ACTION",
            ReturnCode::ProgramDisabled => "PROGRAM_DISABLED",
            ReturnCode::ProgramUndefined => "PROGRAM_UNDEFINED",
            ReturnCode::ProgramExitedUnexpectedly => "PROGRAM_EXITED_UNEXPECTEDLY",
            ReturnCode::UsrsvcdAlreadyRunning => "USRSVCD_ALREADY_RUNNING",
            ReturnCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ReturnCode::ProgramFailedToLaunch => "PROGRAM_FAILED_TO_LAUNCH",
            ReturnCode::HelpMessage => "HELP_MESSAGE",
            ReturnCode::UnknownFailure => "UNKNOWN_FAILURE",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ReturnCode::Success)
    }

    /// Map a raw process exit code back to its symbolic name, for logging a
    /// child process's result (the exit status crosses a `fork`/`waitpid`
    /// boundary as a plain `i32`). Unrecognized codes collapse to
    /// `UNKNOWN_FAILURE` rather than failing the caller.
    pub fn from_code(code: i32) -> Option<ReturnCode> {
        match code {
            0 => Some(ReturnCode::Success),
            1 => Some(ReturnCode::GeneralFailure),
            11 => Some(ReturnCode::TryAgain),
            130 => Some(ReturnCode::InvalidConfig),
            131 => Some(ReturnCode::InvalidAction),
            132 => Some(ReturnCode::ProgramDisabled),
            133 => Some(ReturnCode::ProgramUndefined),
            134 => Some(ReturnCode::ProgramExitedUnexpectedly),
            135 => Some(ReturnCode::UsrsvcdAlreadyRunning),
            136 => Some(ReturnCode::InsufficientPermissions),
            137 => Some(ReturnCode::ProgramFailedToLaunch),
            138 => Some(ReturnCode::HelpMessage),
            254 => Some(ReturnCode::UnknownFailure),
            _ => None,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Collapse an aggregate of return codes the way `all` / `--parallel` fan-out does:
/// success only if every child succeeded, otherwise GENERAL_FAILURE.
pub fn aggregate(codes: impl IntoIterator<Item = ReturnCode>) -> ReturnCode {
    if codes.into_iter().all(|c| c.is_success()) {
        ReturnCode::Success
    } else {
        ReturnCode::GeneralFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_stable_contract() {
        assert_eq!(ReturnCode::Success.code(), 0);
        assert_eq!(ReturnCode::GeneralFailure.code(), 1);
        assert_eq!(ReturnCode::TryAgain.code(), 11);
        assert_eq!(ReturnCode::InvalidConfig.code(), 130);
        assert_eq!(ReturnCode::HelpMessage.code(), 138);
        assert_eq!(ReturnCode::UnknownFailure.code(), 254);
    }

    #[test]
    fn from_code_round_trips_every_known_code() {
        assert_eq!(ReturnCode::from_code(0), Some(ReturnCode::Success));
        assert_eq!(ReturnCode::from_code(137), Some(ReturnCode::ProgramFailedToLaunch));
        assert_eq!(ReturnCode::from_code(254), Some(ReturnCode::UnknownFailure));
        assert_eq!(ReturnCode::from_code(99), None);
    }

    #[test]
    fn aggregate_is_failure_if_any_child_failed() {
        let ok = [ReturnCode::Success, ReturnCode::Success];
        let mixed = [ReturnCode::Success, ReturnCode::ProgramFailedToLaunch];

        assert_eq!(aggregate(ok), ReturnCode::Success);
        assert_eq!(aggregate(mixed), ReturnCode::GeneralFailure);
    }
}
