/*!
One module per table group, plus the [`catalog::Catalog`] that assembles them at startup.
*/

pub mod catalog;
pub mod region;
pub mod schema;
pub mod world;
pub mod zone;
