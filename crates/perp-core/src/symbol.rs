//! Symbol mapper (C2).
//!
//! Per-venue bidirectional mapping between the canonical symbol (e.g. `BTC`) and
//! the exchange-specific instrument id. Unknown venue symbols are a mapper miss
//! (`None`), not an error — callers (fetchers, WS collectors) decide the policy
//! for what to do with an unmapped instrument.

use crate::exchange::Exchange;

/// Bybit prefixes these tokens with `1000` (e.g. `1000PEPEUSDT`) because their
/// nominal unit price is too small to be a sane contract size otherwise.
const BYBIT_THOUSAND_SET: &[&str] = &["BONK", "PEPE", "FLOKI", "TOSHI"];

/// Binance spells the same instrument id differently depending on whether the
/// caller is building a REST query (upper-case) or a WebSocket stream name
/// (lower-case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolCase {
    Upper,
    Lower,
}

/// Convert a canonical symbol (e.g. `BTC`) into the instrument id a venue
/// expects on the wire.
pub fn to_venue_symbol(canonical: &str, exchange: Exchange, case: SymbolCase) -> String {
    let canonical = canonical.to_ascii_uppercase();
    let raw = match exchange {
        Exchange::Binance => format!("{canonical}USDT"),
        Exchange::Okx => format!("{canonical}-USDT-SWAP"),
        Exchange::Bybit => {
            if BYBIT_THOUSAND_SET.contains(&canonical.as_str()) {
                format!("1000{canonical}USDT")
            } else {
                format!("{canonical}USDT")
            }
        }
    };

    match case {
        SymbolCase::Upper => raw.to_ascii_uppercase(),
        SymbolCase::Lower => raw.to_ascii_lowercase(),
    }
}

/// Convert a venue-native instrument id back to the canonical symbol.
///
/// Returns `None` on a mapper miss (unrecognized instrument id shape) rather
/// than an error; error-vs-sparse-feed policy decisions are left to the
/// caller.
pub fn from_venue_symbol(venue_symbol: &str, exchange: Exchange) -> Option<String> {
    let upper = venue_symbol.to_ascii_uppercase();
    match exchange {
        Exchange::Binance => upper.strip_suffix("USDT").map(|s| s.to_string()),
        Exchange::Okx => upper.strip_suffix("-USDT-SWAP").map(|s| s.to_string()),
        Exchange::Bybit => {
            let base = upper.strip_suffix("USDT")?;
            if let Some(stripped) = base.strip_prefix("1000") {
                if BYBIT_THOUSAND_SET.contains(&stripped) {
                    return Some(stripped.to_string());
                }
                // `1000` prefix but base token isn't in the known thousand-set:
                // still a plausible miss, treat as a literal symbol.
                return Some(base.to_string());
            }
            Some(base.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_round_trip() {
        let wire = to_venue_symbol("BTC", Exchange::Binance, SymbolCase::Upper);
        assert_eq!(wire, "BTCUSDT");
        assert_eq!(
            from_venue_symbol(&wire, Exchange::Binance),
            Some("BTC".to_string())
        );
    }

    #[test]
    fn binance_ws_is_lower_case() {
        let wire = to_venue_symbol("BTC", Exchange::Binance, SymbolCase::Lower);
        assert_eq!(wire, "btcusdt");
    }

    #[test]
    fn okx_round_trip() {
        let wire = to_venue_symbol("ETH", Exchange::Okx, SymbolCase::Upper);
        assert_eq!(wire, "ETH-USDT-SWAP");
        assert_eq!(
            from_venue_symbol(&wire, Exchange::Okx),
            Some("ETH".to_string())
        );
    }

    #[test]
    fn bybit_thousand_set_round_trip() {
        let wire = to_venue_symbol("PEPE", Exchange::Bybit, SymbolCase::Upper);
        assert_eq!(wire, "1000PEPEUSDT");
        assert_eq!(
            from_venue_symbol(&wire, Exchange::Bybit),
            Some("PEPE".to_string())
        );
    }

    #[test]
    fn bybit_regular_symbol_unaffected() {
        let wire = to_venue_symbol("BTC", Exchange::Bybit, SymbolCase::Upper);
        assert_eq!(wire, "BTCUSDT");
        assert_eq!(
            from_venue_symbol(&wire, Exchange::Bybit),
            Some("BTC".to_string())
        );
    }

    #[test]
    fn unknown_shape_is_a_miss() {
        assert_eq!(from_venue_symbol("NOT-A-SYMBOL", Exchange::Binance), None);
    }
}
