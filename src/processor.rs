use crate::config::TradingConfig;
use crate::detector::ArbitrageDetector;
use crate::simulator::{ExchangeError, ExchangeSimulator, SnapshotError};
use crate::trade_log::TradeLogger;
use crate::types::{
    canonical_symbol, pair_key, CloseOpportunity, OpenOpportunity, Opportunity, PositionSide,
    RoundTrip, Side, Tick, TrackedPosition,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Registry of live paired trades: pair key -> symbol -> tracked legs
#[derive(Debug, Default)]
pub struct PositionTracker {
    pairs: BTreeMap<String, BTreeMap<String, TrackedPosition>>,
}

impl PositionTracker {
    pub fn register(&mut self, pair_key: &str, symbol: &str, position: TrackedPosition) {
        self.pairs
            .entry(pair_key.to_string())
            .or_default()
            .insert(symbol.to_string(), position);
    }

    pub fn remove(&mut self, pair_key: &str, symbol: &str) -> Option<TrackedPosition> {
        let positions = self.pairs.get_mut(pair_key)?;
        let removed = positions.remove(symbol);
        if positions.is_empty() {
            self.pairs.remove(pair_key);
        }
        removed
    }

    pub fn get(&self, pair_key: &str, symbol: &str) -> Option<&TrackedPosition> {
        self.pairs.get(pair_key)?.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, TrackedPosition>)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Orchestrates the tick flow: price updates, opportunity detection, and
/// paired order execution across two venue simulators.
///
/// Trading errors are logged and swallowed per tick; snapshot I/O errors
/// propagate to the process boundary.
pub struct MessageProcessor {
    simulators: BTreeMap<String, ExchangeSimulator>,
    detector: ArbitrageDetector,
    tracker: PositionTracker,
    base_trade_amount: Decimal,
    trade_log: Option<TradeLogger>,
    realized_pnl: Decimal,
    round_trips: u32,
}

impl MessageProcessor {
    pub fn new(
        simulators: BTreeMap<String, ExchangeSimulator>,
        detector: ArbitrageDetector,
        config: &TradingConfig,
    ) -> Self {
        let base_trade_amount =
            Decimal::try_from(config.base_trade_amount).unwrap_or(Decimal::TEN);
        Self {
            simulators,
            detector,
            tracker: PositionTracker::default(),
            base_trade_amount,
            trade_log: None,
            realized_pnl: Decimal::ZERO,
            round_trips: 0,
        }
    }

    pub fn set_trade_log(&mut self, logger: TradeLogger) {
        self.trade_log = Some(logger);
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn detector(&self) -> &ArbitrageDetector {
        &self.detector
    }

    pub fn simulator(&self, venue: &str) -> Option<&ExchangeSimulator> {
        self.simulators.get(venue)
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// Main loop: drain ticks until the stream ends or shutdown is signaled,
    /// then close every live pair at the last known prices.
    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SnapshotError> {
        info!("Message processor started");

        loop {
            tokio::select! {
                maybe_tick = ticks.recv() => {
                    match maybe_tick {
                        Some(tick) => self.process_message(&tick)?,
                        None => {
                            info!("Tick stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Message processor shutting down");
                        break;
                    }
                }
            }
        }

        self.close_all_positions()?;
        self.log_summary();
        Ok(())
    }

    /// Process one tick: update prices, detect, and act on every opportunity
    pub fn process_message(&mut self, tick: &Tick) -> Result<(), SnapshotError> {
        let symbol = canonical_symbol(&tick.symbol);
        if !self.simulators.contains_key(&tick.venue) {
            warn!(venue = %tick.venue, symbol = %symbol, "Tick from unknown venue dropped");
            return Ok(());
        }

        self.detector.update_prices(&Tick {
            venue: tick.venue.clone(),
            symbol: symbol.clone(),
            price: tick.price,
            timestamp: tick.timestamp,
        });

        let opportunities =
            self.detector
                .detect_opportunity(&symbol, &self.tracker, &self.simulators);

        for opportunity in opportunities {
            match opportunity {
                Opportunity::Open(open) => {
                    let key = pair_key(&open.buy_venue, &open.sell_venue);
                    match self.execute_arbitrage(&open) {
                        Ok(amount) => {
                            self.tracker.register(
                                &key,
                                &open.symbol,
                                TrackedPosition {
                                    buy_venue: open.buy_venue.clone(),
                                    sell_venue: open.sell_venue.clone(),
                                    amount,
                                    opened_at: tick.timestamp,
                                },
                            );
                        }
                        Err(ExchangeError::Snapshot(e)) => return Err(e),
                        Err(e) => {
                            warn!(pair = %key, symbol = %open.symbol, error = %e, "Open failed");
                            self.detector.release_pair(&key);
                        }
                    }
                }
                Opportunity::Close(close) => match self.close_positions(&close) {
                    Ok(_) => {
                        self.tracker.remove(&close.pair_key, &close.symbol);
                        self.detector.release_pair(&close.pair_key);
                    }
                    Err(ExchangeError::Snapshot(e)) => return Err(e),
                    Err(e) => {
                        warn!(pair = %close.pair_key, symbol = %close.symbol, error = %e, "Close failed");
                    }
                },
            }
        }

        Ok(())
    }

    /// Open both legs of a paired trade. Both venues' balances are checked
    /// before either leg is placed, so a rejected order cannot leave a
    /// one-sided position. Returns the base amount placed per leg.
    fn execute_arbitrage(&mut self, op: &OpenOpportunity) -> Result<Decimal, ExchangeError> {
        let buy_leverage = self
            .simulators
            .get(&op.buy_venue)
            .ok_or_else(|| ExchangeError::UnknownVenue {
                venue: op.buy_venue.clone(),
            })?
            .leverage();
        let quote_amount = self.base_trade_amount * buy_leverage;
        let base_amount = quote_amount / op.buy_price;

        for (venue, price) in [(&op.buy_venue, op.buy_price), (&op.sell_venue, op.sell_price)] {
            self.simulators
                .get(venue)
                .ok_or_else(|| ExchangeError::UnknownVenue {
                    venue: venue.clone(),
                })?
                .check_affordable(&op.symbol, base_amount, price)?;
        }

        self.simulators
            .get_mut(&op.buy_venue)
            .ok_or_else(|| ExchangeError::UnknownVenue {
                venue: op.buy_venue.clone(),
            })?
            .place_order(&op.symbol, Side::Buy, base_amount, op.buy_price)?;
        self.simulators
            .get_mut(&op.sell_venue)
            .ok_or_else(|| ExchangeError::UnknownVenue {
                venue: op.sell_venue.clone(),
            })?
            .place_order(&op.symbol, Side::Sell, base_amount, op.sell_price)?;

        info!(
            symbol = %op.symbol,
            buy_venue = %op.buy_venue,
            buy_price = %op.buy_price,
            sell_venue = %op.sell_venue,
            sell_price = %op.sell_price,
            amount = %base_amount,
            spread_pct = %op.spread_pct,
            "Paired position opened"
        );
        Ok(base_amount)
    }

    /// Close both legs of a live pair. The tracker's amount is authoritative.
    fn close_positions(&mut self, op: &CloseOpportunity) -> Result<Decimal, ExchangeError> {
        let tracked = self
            .tracker
            .get(&op.pair_key, &op.symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::NoSuchPosition {
                symbol: op.symbol.clone(),
            })?;

        let buy_receipt = self
            .simulators
            .get_mut(&op.buy_venue)
            .ok_or_else(|| ExchangeError::UnknownVenue {
                venue: op.buy_venue.clone(),
            })?
            .close_position(&op.symbol, PositionSide::Long, tracked.amount, op.buy_price)?;
        let sell_receipt = self
            .simulators
            .get_mut(&op.sell_venue)
            .ok_or_else(|| ExchangeError::UnknownVenue {
                venue: op.sell_venue.clone(),
            })?
            .close_position(&op.symbol, PositionSide::Short, tracked.amount, op.sell_price)?;

        let total_pnl = buy_receipt.pnl + sell_receipt.pnl;
        self.realized_pnl += total_pnl;
        self.round_trips += 1;

        info!(
            symbol = %op.symbol,
            pair = %op.pair_key,
            long_pnl = %buy_receipt.pnl,
            short_pnl = %sell_receipt.pnl,
            total_pnl = %total_pnl,
            "Paired position closed"
        );

        if let Some(log) = &mut self.trade_log {
            log.log_round_trip(&RoundTrip {
                id: Uuid::new_v4().to_string(),
                symbol: op.symbol.clone(),
                pair_key: op.pair_key.clone(),
                buy_venue: op.buy_venue.clone(),
                sell_venue: op.sell_venue.clone(),
                amount: tracked.amount,
                buy_entry: buy_receipt.entry_price,
                buy_exit: op.buy_price,
                sell_entry: sell_receipt.entry_price,
                sell_exit: op.sell_price,
                pnl: total_pnl,
                opened_at: tracked.opened_at,
                closed_at: buy_receipt.closed_at,
            });
        }

        Ok(total_pnl)
    }

    /// Best-effort shutdown: close every live pair at the last known prices.
    /// Pairs with no price for a leg are left open and reported.
    pub fn close_all_positions(&mut self) -> Result<(), SnapshotError> {
        let live: Vec<(String, String, TrackedPosition)> = self
            .tracker
            .iter()
            .flat_map(|(key, positions)| {
                positions
                    .iter()
                    .map(|(symbol, tracked)| (key.clone(), symbol.clone(), tracked.clone()))
            })
            .collect();

        if !live.is_empty() {
            info!(pairs = live.len(), "Closing all live pairs");
        }

        for (key, symbol, tracked) in live {
            let buy = self.detector.latest(&tracked.buy_venue, &symbol);
            let sell = self.detector.latest(&tracked.sell_venue, &symbol);
            let (Some(buy), Some(sell)) = (buy, sell) else {
                error!(
                    pair = %key,
                    symbol = %symbol,
                    "No price available for a leg; pair left open"
                );
                continue;
            };

            let op = CloseOpportunity {
                symbol: symbol.clone(),
                buy_venue: tracked.buy_venue.clone(),
                buy_price: buy.price,
                sell_venue: tracked.sell_venue.clone(),
                sell_price: sell.price,
                amount: tracked.amount,
                pair_key: key.clone(),
            };
            match self.close_positions(&op) {
                Ok(_) => {
                    self.tracker.remove(&key, &symbol);
                    self.detector.release_pair(&key);
                }
                Err(ExchangeError::Snapshot(e)) => return Err(e),
                Err(e) => {
                    error!(pair = %key, symbol = %symbol, error = %e, "Shutdown close failed");
                }
            }
        }

        Ok(())
    }

    /// Final per-venue balances and realized PnL
    pub fn log_summary(&self) {
        if let Some(log) = &self.trade_log {
            log.print_summary();
        }
        for (venue, sim) in &self.simulators {
            for (asset, balance) in sim.balances() {
                info!(
                    venue = %venue,
                    asset = %asset,
                    balance = %balance,
                    loaned = %sim.loaned(asset),
                    "Final venue balance"
                );
            }
        }
        info!(
            round_trips = self.round_trips,
            realized_pnl = %self.realized_pnl,
            open_pairs = self.tracker.len(),
            "Final summary"
        );
    }
}
