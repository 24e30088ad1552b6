//! Event priority, used both by the outbox ordering (`priority DESC, created_at ASC`)
//! and by event-bus filters (`priority_min`).

use serde::{Deserialize, Serialize};

/// Delivery priority of an event.
///
/// Encodes to the numeric values the wire format requires (§6: `"priority": <int in
/// {1,2,3,4}>`), ordered so that `Priority::Critical > Priority::Low` compares the way
/// the outbox `ORDER BY priority DESC` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Lowest priority; processed only once nothing higher-priority is pending.
    Low = 1,
    /// Default priority for events with no explicit priority set.
    Normal = 2,
    /// Expedited priority.
    High = 3,
    /// Highest priority; outbox processor drains these first.
    Critical = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// The numeric value used on the wire and in the outbox `priority` column.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse a wire-format numeric priority, defaulting to `Normal` for anything
    /// outside `1..=4` rather than failing the whole deserialization.
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Low,
            3 => Self::High,
            4 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_low_to_critical() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn numeric_roundtrip() {
        for p in [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(Priority::from_i32(p.as_i32()), p);
        }
    }

    #[test]
    fn unknown_numeric_defaults_to_normal() {
        assert_eq!(Priority::from_i32(99), Priority::Normal);
    }
}
