use crate::config::SimulatorConfig;
use crate::simulator::storage::{SimulatorState, SnapshotError, SnapshotStore};
use crate::types::{
    split_symbol, CloseReceipt, EntryMode, OrderRecord, Position, PositionSide, Side, TradeSide,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Insufficient {asset} balance on {venue}: have {balance}, need {required}")]
    InsufficientBalance {
        venue: String,
        asset: String,
        balance: Decimal,
        required: Decimal,
    },

    #[error("No open position for {symbol}")]
    NoSuchPosition { symbol: String },

    #[error("Close amount {requested} exceeds {side} position of {have} for {symbol}")]
    InsufficientPositionSize {
        symbol: String,
        side: PositionSide,
        have: Decimal,
        requested: Decimal,
    },

    #[error("No entry price recorded for {side} leg of {symbol}")]
    EntryPriceMissing {
        symbol: String,
        side: PositionSide,
    },

    #[error("Symbol {symbol} is not of the form BASE/QUOTE")]
    MalformedSymbol { symbol: String },

    #[error("No simulator configured for venue {venue}")]
    UnknownVenue { venue: String },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Margin exchange simulator for a single venue.
///
/// Orders lock quote-asset margin (notional / leverage) plus the taker fee;
/// closing a leg releases the margin that was locked at entry and settles
/// the PnL against the quote balance. This is a notional margin book, so no
/// base-asset balance ever moves.
pub struct ExchangeSimulator {
    venue: String,
    real_balance: BTreeMap<String, Decimal>,
    loaned_balance: BTreeMap<String, Decimal>,
    positions: BTreeMap<String, Position>,
    orders: Vec<OrderRecord>,
    fee_rate: Decimal,
    leverage: Decimal,
    entry_mode: EntryMode,
    store: Option<SnapshotStore>,
}

impl ExchangeSimulator {
    /// Build a venue simulator. With persistence enabled, an existing
    /// snapshot takes precedence over `initial_funds`.
    pub fn new(
        venue: &str,
        initial_funds: BTreeMap<String, Decimal>,
        config: &SimulatorConfig,
    ) -> Result<Self, SnapshotError> {
        let fee_rate = Decimal::try_from(config.fee_rate).unwrap_or_else(|_| Decimal::new(1, 3));
        let leverage = Decimal::from(config.leverage.max(1));
        let entry_mode = match config.entry_price_mode.to_lowercase().as_str() {
            "weighted_average" => EntryMode::WeightedAverage,
            _ => EntryMode::FirstOpen,
        };

        let store = if config.persist {
            Some(SnapshotStore::new(Path::new(&config.storage_dir), venue)?)
        } else {
            None
        };

        let mut sim = Self {
            venue: venue.to_string(),
            real_balance: initial_funds,
            loaned_balance: BTreeMap::new(),
            positions: BTreeMap::new(),
            orders: Vec::new(),
            fee_rate,
            leverage,
            entry_mode,
            store,
        };

        if let Some(store) = &sim.store {
            if let Some(state) = store.load()? {
                info!(
                    venue = %sim.venue,
                    path = %store.path().display(),
                    orders = state.orders.len(),
                    "Simulator state restored from snapshot"
                );
                sim.restore(state);
            }
        }

        Ok(sim)
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn leverage(&self) -> Decimal {
        self.leverage
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.real_balance.get(asset).copied().unwrap_or_default()
    }

    pub fn balances(&self) -> &BTreeMap<String, Decimal> {
        &self.real_balance
    }

    pub fn loaned(&self, asset: &str) -> Decimal {
        self.loaned_balance.get(asset).copied().unwrap_or_default()
    }

    /// Read a position without creating an entry for untouched symbols
    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    pub fn orders(&self) -> &[OrderRecord] {
        &self.orders
    }

    /// Margin plus fee locked by an order of `amount` at `price`
    pub fn order_cost(&self, amount: Decimal, price: Decimal) -> Decimal {
        price * amount / self.leverage + amount * price * self.fee_rate
    }

    /// Check that the quote balance covers an order without placing it
    pub fn check_affordable(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
    ) -> Result<(), ExchangeError> {
        let (_base, quote) = split_symbol(symbol).ok_or_else(|| ExchangeError::MalformedSymbol {
            symbol: symbol.to_string(),
        })?;
        let required = self.order_cost(amount, price);
        let balance = self.balance(quote);
        if balance < required {
            return Err(ExchangeError::InsufficientBalance {
                venue: self.venue.clone(),
                asset: quote.to_string(),
                balance,
                required,
            });
        }
        Ok(())
    }

    /// Open or extend a leveraged position leg.
    ///
    /// `side` Buy opens the long leg, Sell the short leg; both lock
    /// quote-asset margin.
    pub fn place_order(
        &mut self,
        symbol: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<OrderRecord, ExchangeError> {
        let (_base, quote) = split_symbol(symbol).ok_or_else(|| ExchangeError::MalformedSymbol {
            symbol: symbol.to_string(),
        })?;

        let margin_cost = price * amount / self.leverage;
        let fee = amount * price * self.fee_rate;
        let total_cost = margin_cost + fee;

        let balance = self.balance(quote);
        if balance < total_cost {
            return Err(ExchangeError::InsufficientBalance {
                venue: self.venue.clone(),
                asset: quote.to_string(),
                balance,
                required: total_cost,
            });
        }

        *self.real_balance.entry(quote.to_string()).or_default() -= total_cost;
        *self.loaned_balance.entry(quote.to_string()).or_default() +=
            margin_cost * (self.leverage - Decimal::ONE);

        self.positions
            .entry(symbol.to_string())
            .or_default()
            .add(side.position_side(), amount, price, self.entry_mode);

        let order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: match side {
                Side::Buy => TradeSide::Buy,
                Side::Sell => TradeSide::Sell,
            },
            amount,
            price,
            fee,
            pnl: None,
            created_at: Utc::now(),
        };
        self.orders.push(order.clone());

        debug!(
            venue = %self.venue,
            symbol = %symbol,
            side = ?side,
            amount = %amount,
            price = %price,
            margin = %margin_cost,
            fee = %fee,
            "Order placed"
        );

        self.persist()?;
        Ok(order)
    }

    /// Close part or all of one position leg at `price`, realizing PnL
    pub fn close_position(
        &mut self,
        symbol: &str,
        side: PositionSide,
        amount: Decimal,
        price: Decimal,
    ) -> Result<CloseReceipt, ExchangeError> {
        let (_base, quote) = split_symbol(symbol).ok_or_else(|| ExchangeError::MalformedSymbol {
            symbol: symbol.to_string(),
        })?;

        let position = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| ExchangeError::NoSuchPosition {
                symbol: symbol.to_string(),
            })?;

        let have = position.qty(side);
        if have < amount {
            return Err(ExchangeError::InsufficientPositionSize {
                symbol: symbol.to_string(),
                side,
                have,
                requested: amount,
            });
        }
        let entry = position
            .entry(side)
            .ok_or_else(|| ExchangeError::EntryPriceMissing {
                symbol: symbol.to_string(),
                side,
            })?;

        let fee = amount * price * self.fee_rate;
        let pnl = match side {
            PositionSide::Long => (price - entry) * amount - fee,
            PositionSide::Short => (entry - price) * amount - fee,
        };

        // Release the margin slice locked at entry and settle the PnL
        let margin_release = entry * amount / self.leverage;
        position.reduce(side, amount);
        if position.is_flat() {
            self.positions.remove(symbol);
        }

        *self.real_balance.entry(quote.to_string()).or_default() += pnl + margin_release;
        let loaned = self.loaned_balance.entry(quote.to_string()).or_default();
        *loaned = (*loaned - margin_release * (self.leverage - Decimal::ONE)).max(Decimal::ZERO);

        let closed_at = Utc::now();
        self.orders.push(OrderRecord {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: match side {
                PositionSide::Long => TradeSide::CloseLong,
                PositionSide::Short => TradeSide::CloseShort,
            },
            amount,
            price,
            fee,
            pnl: Some(pnl),
            created_at: closed_at,
        });

        info!(
            venue = %self.venue,
            symbol = %symbol,
            side = %side,
            amount = %amount,
            entry = %entry,
            exit = %price,
            pnl = %pnl,
            "Position leg closed"
        );

        self.persist()?;
        Ok(CloseReceipt {
            symbol: symbol.to_string(),
            side,
            amount,
            price,
            entry_price: entry,
            pnl,
            closed_at,
        })
    }

    /// Wipe balances, positions, and order history back to `initial_funds`
    pub fn hard_reset(
        &mut self,
        initial_funds: BTreeMap<String, Decimal>,
    ) -> Result<(), ExchangeError> {
        self.real_balance = initial_funds;
        self.loaned_balance.clear();
        self.positions.clear();
        self.orders.clear();
        info!(venue = %self.venue, "Simulator hard reset");
        self.persist()?;
        Ok(())
    }

    /// Current durable state, as written to the snapshot file
    pub fn state(&self) -> SimulatorState {
        SimulatorState {
            real_balance: self.real_balance.clone(),
            loaned_balance: self.loaned_balance.clone(),
            positions: self.positions.clone(),
            orders: self.orders.clone(),
        }
    }

    fn restore(&mut self, state: SimulatorState) {
        self.real_balance = state.real_balance;
        self.loaned_balance = state.loaned_balance;
        self.positions = state.positions;
        self.orders = state.orders;
    }

    fn persist(&self) -> Result<(), SnapshotError> {
        if let Some(store) = &self.store {
            store.save(&self.state())?;
        }
        Ok(())
    }
}
