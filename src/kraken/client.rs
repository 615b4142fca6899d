use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct TickersResponse {
    result: String,
    tickers: Vec<Ticker>,
}

/// Subset of a Kraken Futures ticker entry
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
}

/// Minimal Kraken Futures REST client. Only the public tickers endpoint is
/// wired up; it backs the optional startup connectivity check and is not
/// part of the trading core.
pub struct KrakenFuturesClient {
    client: Client,
    base_url: String,
}

impl KrakenFuturesClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Fetch all market tickers
    pub async fn tickers(&self) -> Result<Vec<Ticker>, String> {
        let url = format!("{}/derivatives/api/v3/tickers", self.base_url);
        info!("Fetching Kraken Futures tickers from {}...", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch tickers: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "Tickers request failed with status: {}",
                response.status()
            ));
        }

        let body: TickersResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse tickers: {}", e))?;

        if body.result != "success" {
            return Err(format!("Tickers request returned result: {}", body.result));
        }

        Ok(body.tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_tickers_response() {
        let raw = r#"{
            "result": "success",
            "tickers": [
                {"symbol": "PI_XBTUSD", "last": 97000.5, "bid": 97000.0, "ask": 97001.0},
                {"symbol": "PI_ETHUSD", "last": 3500.25}
            ],
            "serverTime": "2025-01-01T00:00:00.000Z"
        }"#;

        let parsed: TickersResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result, "success");
        assert_eq!(parsed.tickers.len(), 2);
        assert_eq!(parsed.tickers[0].last, Some(dec!(97000.5)));
        assert_eq!(parsed.tickers[1].bid, None);
    }
}
