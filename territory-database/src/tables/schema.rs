/*!
Schema for the reference and ownership tables.
*/

use rusqlite::{Connection, Result};

/// Static reference data is read-only at runtime; `region_ownership` and `zone_lock`
/// are the upsert targets keyed by `(region_id, world_id)` and `(zone_id, world_id)`.
pub const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS world (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL DEFAULT 'ps2',
        tracking_enabled INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS zone (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        hidden INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS map_region (
        id INTEGER PRIMARY KEY,
        zone_id INTEGER NOT NULL REFERENCES zone(id),
        facility_id INTEGER UNIQUE,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS zone_anchor (
        zone_id INTEGER NOT NULL REFERENCES zone(id),
        region_id INTEGER NOT NULL REFERENCES map_region(id),
        PRIMARY KEY (zone_id, region_id)
    );

    CREATE TABLE IF NOT EXISTS region_ownership (
        region_id INTEGER NOT NULL,
        world_id INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        owner_faction_id INTEGER NOT NULL DEFAULT 0,
        owner_outfit_id INTEGER,
        owned_since INTEGER,
        last_capture_time INTEGER,
        PRIMARY KEY (region_id, world_id)
    );

    CREATE TABLE IF NOT EXISTS zone_lock (
        zone_id INTEGER NOT NULL,
        world_id INTEGER NOT NULL,
        locked_faction_id INTEGER,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (zone_id, world_id)
    );

    CREATE INDEX IF NOT EXISTS idx_map_region_zone ON map_region(zone_id);
    CREATE INDEX IF NOT EXISTS idx_ownership_world ON region_ownership(world_id);
"#;

/// Create any missing tables
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
}
