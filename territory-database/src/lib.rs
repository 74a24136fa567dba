/*!
Static reference data and ownership persistence for the territory state governor.

Every SQL statement the governor issues lives in this crate. The [`tables`] module
exposes one type per table along with its lookup helpers and upserts, while
[`tables::catalog::Catalog`] assembles the startup view of tracked worlds, zones
and regions.
*/

pub mod error;
pub mod tables;
pub mod util;

pub use error::table::TableError;
pub use tables::catalog::Catalog;
pub use util::faction::Faction;

/// Map region (facility) identifier.
pub type RegionId = u32;
/// Game world (server) identifier.
pub type WorldId = u32;
/// Zone (continent) identifier. Instanced copies carry the instance in the upper 16 bits.
pub type ZoneId = u32;
/// Facility identifier as reported by the event stream.
pub type FacilityId = u32;
/// Outfit identifier.
pub type OutfitId = u64;
