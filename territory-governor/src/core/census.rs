/*!
Wire helpers for Census payloads, which encode most numbers as JSON strings
*/

use serde::{Deserialize, Deserializer, de::Error};

#[derive(Deserialize)]
#[serde(untagged)]
enum CensusNumber {
    Int(u64),
    Text(String),
}

/// Deserialize an optional Census number that may arrive as `"123"`, `123`, `""` or `null`
pub fn optional_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<CensusNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(CensusNumber::Int(value)) => Ok(Some(value)),
        Some(CensusNumber::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(CensusNumber::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("`{text}` is not a number"))),
    }
}

/// Deserialize a required Census number
pub fn number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    optional_number(deserializer)?.ok_or_else(|| D::Error::custom("missing number"))
}
