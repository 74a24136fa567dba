/*!
Errors that can happen when reading or writing the territory tables.
*/

use std::fmt::{Display, Formatter, Result};

/// Errors that can happen when working with the territory tables
#[derive(Debug)]
pub enum TableError {
    /// A faction id outside the set of known factions
    UnknownFaction(u32),
    /// A stored timestamp that does not fit a calendar date
    InvalidTimestamp(i64),
    /// An anchor or ownership row that points at a region missing from `map_region`
    DanglingRegion(u32),
    /// Error from the underlying SQLite driver
    Sqlite(rusqlite::Error),
}

impl Display for TableError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result {
        match self {
            TableError::UnknownFaction(id) => write!(fmt, "unknown faction id {id}"),
            TableError::InvalidTimestamp(ts) => write!(fmt, "invalid unix timestamp {ts}"),
            TableError::DanglingRegion(id) => {
                write!(fmt, "region {id} is referenced but not defined in map_region")
            }
            TableError::Sqlite(why) => write!(fmt, "sqlite error: {why}"),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableError::Sqlite(why) => Some(why),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TableError {
    fn from(why: rusqlite::Error) -> Self {
        TableError::Sqlite(why)
    }
}
