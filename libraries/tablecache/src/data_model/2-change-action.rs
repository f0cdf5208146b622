//! # ChangeAction
//! Everything that can happen to a cached table. Bulk fetches and realtime events both end up as one of these.

use crate::data_model::Row;

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeAction {
    /// Replace the table's rows wholesale with the result of a bulk read.
    FetchAll { table: String, rows: Vec<Row> },
    /// Append a row at the end of the table.
    Insert { table: String, row: Row },
    /// Replace the row with the same id, keeping its position.
    Update { table: String, row: Row },
    /// Remove the row with the same id.
    Delete { table: String, row: Row },
}

impl ChangeAction {
    pub fn table(&self) -> &str {
        match self {
            Self::FetchAll { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchAll { .. } => "fetch_all",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}
