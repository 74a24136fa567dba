/*!
Known factions, including the neutral sentinel.
*/

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::table::TableError;

/// A faction that can own territory.
///
/// `Faction::None` is the neutral sentinel: regions that nobody holds, and the
/// owner every region starts with before any ownership is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Faction {
    None,
    Vs,
    Nc,
    Tr,
    Nso,
}

impl Faction {
    /// Census id of the faction
    pub fn id(self) -> u32 {
        match self {
            Faction::None => 0,
            Faction::Vs => 1,
            Faction::Nc => 2,
            Faction::Tr => 3,
            Faction::Nso => 4,
        }
    }

    pub fn is_neutral(self) -> bool {
        self == Faction::None
    }
}

impl TryFrom<u32> for Faction {
    type Error = TableError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Faction::None),
            1 => Ok(Faction::Vs),
            2 => Ok(Faction::Nc),
            3 => Ok(Faction::Tr),
            4 => Ok(Faction::Nso),
            other => Err(TableError::UnknownFaction(other)),
        }
    }
}

impl From<Faction> for u32 {
    fn from(faction: Faction) -> Self {
        faction.id()
    }
}

impl Display for Faction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Faction::None => "None",
            Faction::Vs => "VS",
            Faction::Nc => "NC",
            Faction::Tr => "TR",
            Faction::Nso => "NSO",
        };
        write!(f, "{name}")
    }
}
