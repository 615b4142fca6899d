use crate::types::{canonical_symbol, Tick};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One broker delivery as published on the market-data exchange.
/// Only timestamp, exchange, instrument_id, and price feed the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickMessage {
    pub timestamp: i64,
    pub exchange: String,
    pub instrument_id: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_bid: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_ask: Option<Decimal>,
    #[serde(default, rename = "24h_volume", skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Decimal>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Malformed tick: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Tick price {0} is not positive")]
    InvalidPrice(Decimal),

    #[error("Tick timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

impl TickMessage {
    /// Validate and canonicalize into the internal tick form
    pub fn normalize(self) -> Result<Tick, FeedError> {
        if self.price <= Decimal::ZERO {
            return Err(FeedError::InvalidPrice(self.price));
        }
        let timestamp = DateTime::from_timestamp(self.timestamp, 0)
            .ok_or(FeedError::InvalidTimestamp(self.timestamp))?;
        Ok(Tick {
            venue: self.exchange,
            symbol: canonical_symbol(&self.instrument_id),
            price: self.price,
            timestamp,
        })
    }
}

/// Decode one raw broker delivery
pub fn decode(raw: &str) -> Result<Tick, FeedError> {
    let message: TickMessage = serde_json::from_str(raw)?;
    message.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_full_message() {
        let raw = r#"{"timestamp": 1735686000, "exchange": "bybit",
            "instrument_id": "ADA-USD", "price": 0.8482,
            "best_bid": 0.8481, "best_ask": 0.8483, "24h_volume": 18594708.87}"#;

        let tick = decode(raw).unwrap();
        assert_eq!(tick.venue, "bybit");
        assert_eq!(tick.symbol, "ADA/USD");
        assert_eq!(tick.price, dec!(0.8482));
        assert_eq!(tick.timestamp.timestamp(), 1735686000);
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let raw = r#"{"timestamp": 1735686000, "exchange": "binance",
            "instrument_id": "BTC-USD", "price": 97000.5}"#;

        let tick = decode(raw).unwrap();
        assert_eq!(tick.symbol, "BTC/USD");
        assert_eq!(tick.price, dec!(97000.5));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(decode("not json"), Err(FeedError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"timestamp": 1, "exchange": "x"}"#),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_positive_price() {
        let raw = r#"{"timestamp": 1, "exchange": "binance",
            "instrument_id": "BTC-USD", "price": 0}"#;
        assert!(matches!(decode(raw), Err(FeedError::InvalidPrice(_))));
    }
}
