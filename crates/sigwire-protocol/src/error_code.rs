//! The numeric error taxonomy carried in `/error` messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Major version of the session API we announce.
pub const API_VERSION_MAJOR: i32 = 1;

/// Minor version of the session API we announce.
pub const API_VERSION_MINOR: i32 = 1;

/// A protocol-level result code.
///
/// Transmitted as a small signed integer alongside a human-readable
/// string, e.g. `/error ("/nsm/server/announce", -2, "...")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    General = -1,
    IncompatibleApi = -2,
    Blacklisted = -3,
    LaunchFailed = -4,
    NoSuchFile = -5,
    NoSessionOpen = -6,
    UnsavedChanges = -7,
    NotNow = -8,
    BadProject = -9,
    CreateFailed = -10,
    SessionLocked = -11,
    OperationPending = -12,
    SaveFailed = -99,
}

impl ErrorCode {
    const ALL: [ErrorCode; 14] = [
        Self::Ok,
        Self::General,
        Self::IncompatibleApi,
        Self::Blacklisted,
        Self::LaunchFailed,
        Self::NoSuchFile,
        Self::NoSessionOpen,
        Self::UnsavedChanges,
        Self::NotNow,
        Self::BadProject,
        Self::CreateFailed,
        Self::SessionLocked,
        Self::OperationPending,
        Self::SaveFailed,
    ];

    /// The wire value.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a wire value back to a code. Unknown values are treated as
    /// [`ErrorCode::General`].
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .unwrap_or(Self::General)
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Short human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::General => "General error",
            Self::IncompatibleApi => "Incompatible API version",
            Self::Blacklisted => "Client blacklisted",
            Self::LaunchFailed => "Launch failed",
            Self::NoSuchFile => "No such file",
            Self::NoSessionOpen => "No session open",
            Self::UnsavedChanges => "Unsaved changes would be lost",
            Self::NotNow => "Operation cannot be done now",
            Self::BadProject => "Bad project",
            Self::CreateFailed => "Creation failed",
            Self::SessionLocked => "Session is locked",
            Self::OperationPending => "Operation pending",
            Self::SaveFailed => "Save failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}
