use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Test category scheduled independently by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    Web,
    App,
    Api,
}

impl Suite {
    pub const ALL: [Suite; 3] = [Suite::Web, Suite::App, Suite::Api];

    /// Upper-case name used in bug titles and user-facing messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Suite::Web => "WEB",
            Suite::App => "APP",
            Suite::Api => "API",
        }
    }

    /// Prefix for transcript marker lines, e.g. `[webtest] finished with code 0`.
    pub fn log_label(self) -> &'static str {
        match self {
            Suite::Web => "webtest",
            Suite::App => "apptest",
            Suite::Api => "apitest",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Suite::Web => "web",
            Suite::App => "app",
            Suite::Api => "api",
        }
    }

    /// Case fields checked, in order, when matching a requested identifier.
    pub fn id_fields(self) -> &'static [&'static str] {
        match self {
            Suite::Web | Suite::App => &["id"],
            Suite::Api => &["id", "step"],
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Suite::Web => 0,
            Suite::App => 1,
            Suite::Api => 2,
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(Suite::Web),
            "app" => Ok(Suite::App),
            "api" => Ok(Suite::Api),
            other => Err(format!("Unknown suite: {}", other)),
        }
    }
}
