//! Control protocol: subscribe / unsubscribe messages.
//!
//! Wire form (ASCII, colon separated):
//!
//! ```text
//! subscribe:<namespace>[:<start timestamp>]
//! unsubscribe:<namespace>
//! ```

use std::fmt;

use crate::namespace::Namespace;
use crate::types::Timestamp;

const SUBSCRIBE: &str = "subscribe";
const UNSUBSCRIBE: &str = "unsubscribe";

/// What a control event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAction {
    /// Start tracking a namespace, optionally from a start timestamp.
    Start,
    /// Stop tracking a namespace immediately.
    End,
}

impl SubAction {
    fn command(self) -> &'static str {
        match self {
            Self::Start => SUBSCRIBE,
            Self::End => UNSUBSCRIBE,
        }
    }
}

/// A parsed control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubEvent {
    pub action: SubAction,
    pub namespace: Namespace,
    /// Blocks older than this are counted but not replicated. `0` = all.
    pub start: Timestamp,
}

impl SubEvent {
    pub fn start(namespace: Namespace, start: Timestamp) -> Self {
        Self {
            action: SubAction::Start,
            namespace,
            start,
        }
    }

    pub fn end(namespace: Namespace) -> Self {
        Self {
            action: SubAction::End,
            namespace,
            start: 0,
        }
    }

    /// Parse a raw control payload. Malformed payloads yield `None`.
    ///
    /// A start segment that is not a plain run of decimal digits is ignored and the
    /// event is still accepted with `start = 0`. Segments past the third are
    /// ignored.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut parts = payload.split(':');
        let action = match parts.next()? {
            SUBSCRIBE => SubAction::Start,
            UNSUBSCRIBE => SubAction::End,
            _ => return None,
        };
        let namespace = Namespace::load_str(parts.next()?).ok()?;
        let start = parts
            .next()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<Timestamp>().ok())
            .unwrap_or(0);
        Some(Self {
            action,
            namespace,
            start,
        })
    }
}

/// Canonical wire form. The start segment is only written when non-zero.
impl fmt::Display for SubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action.command(), self.namespace)?;
        if self.start != 0 {
            write!(f, ":{}", self.start)?;
        }
        Ok(())
    }
}
