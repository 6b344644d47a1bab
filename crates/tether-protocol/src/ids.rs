//! Canonical ID types for tether.
//!
//! IDs are opaque String wrappers (serde-transparent). Run ids are generated
//! as simple (un-hyphenated) UUID v4 hex so they double as log file names;
//! tool-call ids are whatever the model assigned.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID from a random UUID v4, rendered as 32 hex chars.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Identifier of a durable agent run. Owns exactly one event log.
    RunId
);
typed_id!(
    /// Identifier of a model-requested tool invocation within a run.
    ToolCallId
);

/// Position of an event within its run (0-based, dense).
pub type StepIndex = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_run_ids_are_hex_and_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_id_from_string() {
        let id = RunId::from_string("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn typed_id_is_transparent_on_the_wire() {
        let id = ToolCallId::from("call_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"call_1\"");
        let back: ToolCallId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
