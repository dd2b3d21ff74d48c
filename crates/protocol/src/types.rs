//! Typed QMP payloads
//!
//! Return values of the commands this workspace issues, plus the error and
//! event bodies shared by [`crate::ServerMessage`].

use serde::{Deserialize, Serialize};

/// Error body of a failed reply
///
/// `desc` is carried verbatim; callers pattern-match it to tell an
/// "already absent" device apart from a genuine failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QmpErrorBody {
    pub class: String,
    pub desc: String,
}

/// Event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimestamp {
    pub seconds: i64,
    pub microseconds: i64,
}

/// Return value of `query-status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub running: bool,
    #[serde(default)]
    pub singlestep: bool,
    pub status: String,
}

/// One entry of a `qom-list` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QomProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl QomProperty {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }

    /// `child<T>` property
    pub fn is_child_of(&self, type_name: &str) -> bool {
        self.kind
            .strip_prefix("child<")
            .and_then(|rest| rest.strip_suffix('>'))
            == Some(type_name)
    }

    /// `link<T>` property
    pub fn is_link_to(&self, type_name: &str) -> bool {
        self.kind
            .strip_prefix("link<")
            .and_then(|rest| rest.strip_suffix('>'))
            == Some(type_name)
    }
}
