/*!
Shared helpers for faction ids and Census timestamps.
*/

pub mod dates;
pub mod faction;
