//! redb table definitions.

use redb::TableDefinition;

/// Scaling state keyed by pool id, JSON-encoded.
pub const SCALING_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_states");
