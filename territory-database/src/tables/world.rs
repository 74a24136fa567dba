/*!
Game worlds (servers) and their Census namespaces.
*/

use rusqlite::{Connection, OptionalExtension, Result, Row};

use crate::WorldId;

/// A tracked game world
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct World {
    pub id: WorldId,
    pub name: String,
    /// Census namespace the world's map is served from, e.g. `ps2` or `ps2ps4us`
    pub namespace: String,
}

impl World {
    pub fn new(id: WorldId, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Fetch every world with tracking enabled
    pub fn tracked(conn: &Connection) -> Result<Vec<World>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, namespace FROM world WHERE tracking_enabled = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::from_row)?;
        rows.collect()
    }

    /// Look up the Census namespace for a world
    pub fn namespace(conn: &Connection, world_id: WorldId) -> Result<Option<String>> {
        conn.query_row(
            "SELECT namespace FROM world WHERE id = ?1",
            [world_id],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO world (id, name, namespace, tracking_enabled) VALUES (?1, ?2, ?3, 1)",
            (self.id, &self.name, &self.namespace),
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> Result<World> {
        Ok(World {
            id: row.get(0)?,
            name: row.get(1)?,
            namespace: row.get(2)?,
        })
    }
}
