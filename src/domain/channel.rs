use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Short channel identifier as defined by the node.
///
/// An opaque 64-bit unsigned integer; equality is numeric. The encoded
/// block/tx/output structure is never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        ChannelId(id)
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// SQLite stores 64-bit signed integers; the bit pattern round-trips.
    #[inline]
    pub(crate) fn to_db(self) -> i64 {
        self.0 as i64
    }

    #[inline]
    pub(crate) fn from_db(raw: i64) -> Self {
        ChannelId(raw as u64)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(ChannelId)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        ChannelId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let id: ChannelId = "700000000000000000".parse().unwrap();
        assert_eq!(id, ChannelId(700_000_000_000_000_000));

        assert!("not-a-channel".parse::<ChannelId>().is_err());
        assert!("-1".parse::<ChannelId>().is_err());
    }

    #[test]
    fn test_db_roundtrip() {
        for raw in [0u64, 800, 700_000_000_000_000_000, u64::MAX] {
            let id = ChannelId(raw);
            assert_eq!(ChannelId::from_db(id.to_db()), id);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelId(800).to_string(), "800");
    }
}
