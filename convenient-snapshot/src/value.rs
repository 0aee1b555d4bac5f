//! Snapshots of non-file input values
//!
//! A value snapshot is an immutable, structurally comparable record of one
//! logical input value. Arbitrary object graphs are collapsed to the hash of
//! their canonical JSON form; values that cannot be represented snapshot as
//! `Unknown`, which is never equal to anything and so always forces
//! re-execution.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable snapshot of one logical input value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueSnapshot {
    /// Explicit null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// String value
    String(String),
    /// Ordered list of snapshots
    List(Vec<ValueSnapshot>),
    /// Arbitrary object graph, reduced to its canonical JSON hash
    Serialized {
        /// Hash of the canonical (key-sorted) JSON rendering
        hash: ContentHash,
    },
    /// Value that could not be snapshotted; never comparable
    Unknown {
        /// Why the value could not be snapshotted
        reason: String,
    },
}

impl PartialEq for ValueSnapshot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Serialized { hash: a }, Self::Serialized { hash: b }) => a == b,
            // Unknown is not equal even to itself: it must force re-execution
            _ => false,
        }
    }
}

/// Turns raw input values into [`ValueSnapshot`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSnapshotter;

impl ValueSnapshotter {
    /// Create a value snapshotter
    pub fn new() -> Self {
        Self
    }

    /// Snapshot a JSON value
    ///
    /// Scalars and arrays map structurally; objects and non-integral numbers
    /// collapse to the hash of their canonical rendering. serde_json's
    /// default object map keeps keys sorted, so the rendering is canonical.
    pub fn snapshot(&self, value: &Value) -> ValueSnapshot {
        match value {
            Value::Null => ValueSnapshot::Null,
            Value::Bool(boolean) => ValueSnapshot::Boolean(*boolean),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => ValueSnapshot::Integer(integer),
                None => ValueSnapshot::Serialized {
                    hash: ContentHash::of_bytes(number.to_string().as_bytes()),
                },
            },
            Value::String(string) => ValueSnapshot::String(string.clone()),
            Value::Array(items) => {
                ValueSnapshot::List(items.iter().map(|item| self.snapshot(item)).collect())
            }
            Value::Object(_) => match serde_json::to_string(value) {
                Ok(canonical) => ValueSnapshot::Serialized {
                    hash: ContentHash::of_bytes(canonical.as_bytes()),
                },
                Err(err) => ValueSnapshot::Unknown {
                    reason: format!("value is not serializable: {err}"),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_snapshots_compare_structurally() {
        let snapshotter = ValueSnapshotter::new();
        assert_eq!(snapshotter.snapshot(&json!("a")), snapshotter.snapshot(&json!("a")));
        assert_ne!(snapshotter.snapshot(&json!("a")), snapshotter.snapshot(&json!("b")));
        assert_ne!(snapshotter.snapshot(&json!(1)), snapshotter.snapshot(&json!("1")));
    }

    #[test]
    fn object_snapshot_is_key_order_independent() {
        let snapshotter = ValueSnapshotter::new();
        let a = snapshotter.snapshot(&json!({"x": 1, "y": 2}));
        let b = snapshotter.snapshot(&json!({"y": 2, "x": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_is_never_equal() {
        let unknown = ValueSnapshot::Unknown {
            reason: "opaque".to_string(),
        };
        assert_ne!(unknown, unknown.clone());
        assert_ne!(unknown, ValueSnapshot::Null);
    }

    #[test]
    fn lists_preserve_order() {
        let snapshotter = ValueSnapshotter::new();
        let a = snapshotter.snapshot(&json!([1, 2]));
        let b = snapshotter.snapshot(&json!([2, 1]));
        assert_ne!(a, b);
    }
}
