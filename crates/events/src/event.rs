use chrono::{DateTime, Utc};

/// A notification emitted after a ledger change has been committed.
///
/// Events are:
/// - **immutable** (facts about committed movements)
/// - **versioned** (schema evolution for external consumers)
/// - emitted only **after** the enclosing transaction commits
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.stock.changed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the change was committed.
    fn occurred_at(&self) -> DateTime<Utc>;
}
