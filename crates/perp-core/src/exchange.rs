//! Venue identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three venues this pipeline ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
}

impl Exchange {
    /// Short tag used in storage (`bin`, `byb`, `okx`) and perpspec prefixes.
    pub const fn tag(self) -> &'static str {
        match self {
            Exchange::Binance => "bin",
            Exchange::Bybit => "byb",
            Exchange::Okx => "okx",
        }
    }

    pub const ALL: [Exchange; 3] = [Exchange::Binance, Exchange::Bybit, Exchange::Okx];
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bin" | "binance" => Ok(Exchange::Binance),
            "byb" | "bybit" => Ok(Exchange::Bybit),
            "okx" => Ok(Exchange::Okx),
            other => Err(format!("unknown exchange tag: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tag() {
        for ex in Exchange::ALL {
            assert_eq!(ex.tag().parse::<Exchange>().unwrap(), ex);
        }
    }
}
