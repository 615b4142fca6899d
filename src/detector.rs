use crate::config::DetectorConfig;
use crate::processor::PositionTracker;
use crate::simulator::ExchangeSimulator;
use crate::types::{
    pair_key, CloseOpportunity, OpenOpportunity, Opportunity, PricePoint, Tick,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Detects inter-venue price dislocations for a symbol.
///
/// Keeps a bounded price history per (venue, symbol) and a directional set
/// of active pair keys. Only the newest history entry drives detection; the
/// tail bounds memory and leaves room for smoothing later.
pub struct ArbitrageDetector {
    threshold_pct: Decimal,
    alignment_threshold_pct: Decimal,
    history_size: usize,
    /// venue -> symbol -> price history, newest at the back
    history: BTreeMap<String, BTreeMap<String, VecDeque<PricePoint>>>,
    /// `{buy}-{sell}` keys with a live paired trade
    active_pairs: BTreeSet<String>,
}

impl ArbitrageDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        let threshold_pct =
            Decimal::try_from(config.threshold_pct).unwrap_or_else(|_| Decimal::new(5, 1));
        let alignment_threshold_pct = Decimal::try_from(config.alignment_threshold_pct)
            .unwrap_or_else(|_| Decimal::new(1, 2));

        Self {
            threshold_pct,
            alignment_threshold_pct,
            history_size: config.history_size.max(1),
            history: BTreeMap::new(),
            active_pairs: BTreeSet::new(),
        }
    }

    /// Record a tick in the venue's rolling history
    pub fn update_prices(&mut self, tick: &Tick) {
        debug!(
            venue = %tick.venue,
            symbol = %tick.symbol,
            price = %tick.price,
            "Price update"
        );
        let history = self
            .history
            .entry(tick.venue.clone())
            .or_default()
            .entry(tick.symbol.clone())
            .or_default();
        history.push_back(PricePoint {
            price: tick.price,
            timestamp: tick.timestamp,
        });
        if history.len() > self.history_size {
            history.pop_front();
        }
    }

    /// Newest recorded price for (venue, symbol)
    pub fn latest(&self, venue: &str, symbol: &str) -> Option<PricePoint> {
        self.history.get(venue)?.get(symbol)?.back().copied()
    }

    /// All venues' newest prices for `symbol`, in venue order
    pub fn latest_by_venue(&self, symbol: &str) -> BTreeMap<String, Decimal> {
        self.history
            .iter()
            .filter_map(|(venue, symbols)| {
                let point = symbols.get(symbol)?.back()?;
                Some((venue.clone(), point.price))
            })
            .collect()
    }

    pub fn active_pairs(&self) -> &BTreeSet<String> {
        &self.active_pairs
    }

    /// Drop an active pair key, re-enabling opens in both directions.
    /// Called by the coordinator after a close, or to roll back a failed open.
    pub fn release_pair(&mut self, key: &str) {
        self.active_pairs.remove(key);
    }

    /// Scan for open and close opportunities on `symbol`.
    ///
    /// Opens iterate ordered venue pairs lexicographically; emitting one
    /// marks its key active, which suppresses the mirror direction for the
    /// rest of this tick and until the coordinator releases the key.
    /// Closes come from the tracker's live pairs once their legs reconverge
    /// within the alignment threshold of the sell leg.
    pub fn detect_opportunity(
        &mut self,
        symbol: &str,
        tracker: &PositionTracker,
        simulators: &BTreeMap<String, ExchangeSimulator>,
    ) -> Vec<Opportunity> {
        let latest = self.latest_by_venue(symbol);
        if latest.len() < 2 {
            debug!(symbol = %symbol, venues = latest.len(), "Not enough venues for detection");
            return Vec::new();
        }

        let mut opportunities = Vec::new();

        for (buy_venue, &buy_price) in &latest {
            for (sell_venue, &sell_price) in &latest {
                if buy_venue == sell_venue {
                    continue;
                }
                let spread_pct = (sell_price - buy_price) / buy_price * Decimal::ONE_HUNDRED;
                if spread_pct < self.threshold_pct {
                    continue;
                }
                let key = pair_key(buy_venue, sell_venue);
                let mirror = pair_key(sell_venue, buy_venue);
                if self.active_pairs.contains(&key) || self.active_pairs.contains(&mirror) {
                    debug!(pair = %key, "Open suppressed: pair already active");
                    continue;
                }
                if has_open_position(simulators, buy_venue, symbol)
                    || has_open_position(simulators, sell_venue, symbol)
                {
                    debug!(pair = %key, symbol = %symbol, "Open suppressed: venue holds a position");
                    continue;
                }

                info!(
                    symbol = %symbol,
                    buy_venue = %buy_venue,
                    buy_price = %buy_price,
                    sell_venue = %sell_venue,
                    sell_price = %sell_price,
                    spread_pct = %spread_pct,
                    "Open opportunity detected"
                );
                self.active_pairs.insert(key);
                opportunities.push(Opportunity::Open(OpenOpportunity {
                    symbol: symbol.to_string(),
                    buy_venue: buy_venue.clone(),
                    buy_price,
                    sell_venue: sell_venue.clone(),
                    sell_price,
                    spread_pct,
                }));
            }
        }

        for (key, positions) in tracker.iter() {
            let Some(tracked) = positions.get(symbol) else {
                continue;
            };
            let (Some(buy), Some(sell)) = (
                self.latest(&tracked.buy_venue, symbol),
                self.latest(&tracked.sell_venue, symbol),
            ) else {
                continue;
            };

            let spread_pct =
                (buy.price - sell.price).abs() / sell.price * Decimal::ONE_HUNDRED;
            if spread_pct > self.alignment_threshold_pct {
                continue;
            }

            info!(
                symbol = %symbol,
                pair = %key,
                buy_price = %buy.price,
                sell_price = %sell.price,
                spread_pct = %spread_pct,
                "Close opportunity detected"
            );
            opportunities.push(Opportunity::Close(CloseOpportunity {
                symbol: symbol.to_string(),
                buy_venue: tracked.buy_venue.clone(),
                buy_price: buy.price,
                sell_venue: tracked.sell_venue.clone(),
                sell_price: sell.price,
                amount: tracked.amount,
                pair_key: key.clone(),
            }));
        }

        opportunities
    }
}

fn has_open_position(
    simulators: &BTreeMap<String, ExchangeSimulator>,
    venue: &str,
    symbol: &str,
) -> bool {
    simulators
        .get(venue)
        .map(|sim| !sim.position(symbol).is_flat())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::types::{Side, TrackedPosition};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn detector(threshold_pct: f64, alignment_threshold_pct: f64) -> ArbitrageDetector {
        ArbitrageDetector::new(&DetectorConfig {
            threshold_pct,
            alignment_threshold_pct,
            history_size: 5,
        })
    }

    fn tick(venue: &str, symbol: &str, price: Decimal, at: i64) -> Tick {
        Tick {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            price,
            timestamp: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    fn simulators(venues: &[&str]) -> BTreeMap<String, ExchangeSimulator> {
        let config = SimulatorConfig {
            fee_rate: 0.0,
            leverage: 10,
            persist: false,
            storage_dir: "storage".to_string(),
            entry_price_mode: "first_open".to_string(),
            initial_funds: std::collections::HashMap::new(),
        };
        venues
            .iter()
            .map(|v| {
                let funds = BTreeMap::from([("USD".to_string(), dec!(10000))]);
                (
                    v.to_string(),
                    ExchangeSimulator::new(v, funds, &config).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn open_emitted_at_threshold() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.6), 2));

        let ops = det.detect_opportunity("BTC/USD", &tracker, &sims);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Opportunity::Open(open) => {
                assert_eq!(open.buy_venue, "binance");
                assert_eq!(open.buy_price, dec!(100));
                assert_eq!(open.sell_venue, "bybit");
                assert_eq!(open.sell_price, dec!(100.6));
                assert_eq!(open.spread_pct, dec!(0.6));
            }
            other => panic!("expected open, got {other:?}"),
        }
        assert!(det.active_pairs().contains("binance-bybit"));
    }

    #[test]
    fn open_threshold_is_inclusive() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.5), 2));

        let ops = det.detect_opportunity("BTC/USD", &tracker, &sims);
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn no_open_below_threshold() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.3), 2));

        assert!(det.detect_opportunity("BTC/USD", &tracker, &sims).is_empty());
        assert!(det.active_pairs().is_empty());
    }

    #[test]
    fn single_venue_detects_nothing() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        assert!(det.detect_opportunity("BTC/USD", &tracker, &sims).is_empty());
    }

    #[test]
    fn mirror_direction_is_blocked_while_active() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.6), 2));
        assert_eq!(det.detect_opportunity("BTC/USD", &tracker, &sims).len(), 1);

        // bybit drops below binance, which would mirror the active pair
        det.update_prices(&tick("bybit", "BTC/USD", dec!(99), 3));
        assert!(det.detect_opportunity("BTC/USD", &tracker, &sims).is_empty());

        // released, the reverse direction is allowed again
        det.release_pair("binance-bybit");
        let ops = det.detect_opportunity("BTC/USD", &tracker, &sims);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Opportunity::Open(open) => {
                assert_eq!(open.buy_venue, "bybit");
                assert_eq!(open.sell_venue, "binance");
            }
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn open_blocked_by_existing_venue_position() {
        let mut det = detector(0.5, 0.01);
        let mut sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        sims.get_mut("binance")
            .unwrap()
            .place_order("BTC/USD", Side::Buy, dec!(1), dec!(100))
            .unwrap();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.6), 2));

        assert!(det.detect_opportunity("BTC/USD", &tracker, &sims).is_empty());
        assert!(det.active_pairs().is_empty());
    }

    #[test]
    fn venue_pairs_iterate_lexicographically() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit", "kraken"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.6), 2));
        det.update_prices(&tick("kraken", "BTC/USD", dec!(100.7), 3));

        let ops = det.detect_opportunity("BTC/USD", &tracker, &sims);
        let pairs: Vec<(String, String)> = ops
            .iter()
            .map(|op| match op {
                Opportunity::Open(o) => (o.buy_venue.clone(), o.sell_venue.clone()),
                other => panic!("expected open, got {other:?}"),
            })
            .collect();
        // binance-bybit wins first, binance-kraken follows; bybit-kraken is
        // under threshold
        assert_eq!(
            pairs,
            vec![
                ("binance".to_string(), "bybit".to_string()),
                ("binance".to_string(), "kraken".to_string()),
            ]
        );
    }

    #[test]
    fn close_uses_sell_leg_denominator_inclusively() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let mut tracker = PositionTracker::default();
        tracker.register(
            "binance-bybit",
            "BTC/USD",
            TrackedPosition {
                buy_venue: "binance".to_string(),
                sell_venue: "bybit".to_string(),
                amount: dec!(1),
                opened_at: Utc.timestamp_opt(1, 0).unwrap(),
            },
        );
        det.active_pairs.insert("binance-bybit".to_string());

        // |99.99 - 100| / 100 * 100 = 0.01 exactly: in, against the sell leg.
        // Against the buy leg it would be 0.010001 and out.
        det.update_prices(&tick("binance", "BTC/USD", dec!(99.99), 10));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100), 11));

        let ops = det.detect_opportunity("BTC/USD", &tracker, &sims);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Opportunity::Close(close) => {
                assert_eq!(close.pair_key, "binance-bybit");
                assert_eq!(close.amount, dec!(1));
                assert_eq!(close.buy_price, dec!(99.99));
                assert_eq!(close.sell_price, dec!(100));
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn no_close_while_spread_remains_wide() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let mut tracker = PositionTracker::default();
        tracker.register(
            "binance-bybit",
            "BTC/USD",
            TrackedPosition {
                buy_venue: "binance".to_string(),
                sell_venue: "bybit".to_string(),
                amount: dec!(1),
                opened_at: Utc.timestamp_opt(1, 0).unwrap(),
            },
        );
        det.active_pairs.insert("binance-bybit".to_string());

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 10));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.2), 11));

        assert!(det.detect_opportunity("BTC/USD", &tracker, &sims).is_empty());
    }

    #[test]
    fn history_is_bounded_and_newest_wins() {
        let mut det = ArbitrageDetector::new(&DetectorConfig {
            threshold_pct: 0.5,
            alignment_threshold_pct: 0.01,
            history_size: 3,
        });

        for i in 0..7 {
            det.update_prices(&tick("binance", "BTC/USD", Decimal::from(100 + i), i));
        }
        let history = &det.history["binance"]["BTC/USD"];
        assert_eq!(history.len(), 3);
        assert_eq!(det.latest("binance", "BTC/USD").unwrap().price, dec!(106));
    }

    #[test]
    fn symbols_are_tracked_independently() {
        let mut det = detector(0.5, 0.01);
        let sims = simulators(&["binance", "bybit"]);
        let tracker = PositionTracker::default();

        det.update_prices(&tick("binance", "BTC/USD", dec!(100), 1));
        det.update_prices(&tick("bybit", "BTC/USD", dec!(100.6), 2));
        det.update_prices(&tick("binance", "ADA/USD", dec!(0.845), 3));

        // ADA has a single venue, BTC has two
        assert!(det.detect_opportunity("ADA/USD", &tracker, &sims).is_empty());
        assert_eq!(det.detect_opportunity("BTC/USD", &tracker, &sims).len(), 1);
    }
}
