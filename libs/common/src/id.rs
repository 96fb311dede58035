use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ulid::Ulid;

/// Identifier of one live connection: `ws_` followed by a ULID.
///
/// Ids sort by creation time, which can be read back out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    ulid: Ulid,
    text: String,
}

impl SessionId {
    pub const PREFIX: &'static str = "ws";

    pub fn generate() -> Self {
        let ulid = Ulid::new();
        Self {
            text: format!("{}_{}", Self::PREFIX, ulid),
            ulid,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Milliseconds since the Unix epoch at which the id was generated.
    pub fn created_at_ms(&self) -> u64 {
        self.ulid.timestamp_ms()
    }

    /// Time elapsed since the id was generated. Zero if the clock went back.
    pub fn age(&self) -> Duration {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
