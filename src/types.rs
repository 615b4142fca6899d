use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// The position leg an order of this side opens
    pub fn position_side(self) -> PositionSide {
        match self {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

/// Side of a position leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Convert a wire symbol (`BTC-USD`) to canonical form (`BTC/USD`).
/// Already-canonical symbols pass through unchanged.
pub fn canonical_symbol(symbol: &str) -> String {
    symbol.replace('-', "/")
}

/// Convert a canonical symbol back to the wire form.
pub fn wire_symbol(symbol: &str) -> String {
    symbol.replace('/', "-")
}

/// Split a canonical symbol into (base, quote)
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

/// Normalized price observation for (venue, symbol)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub venue: String,
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a venue's rolling price history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePoint {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// How a repeated `place_order` on an already-open leg sets the entry price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// The first fill from zero fixes the entry; later adds keep it
    FirstOpen,
    /// Later adds blend into a quantity-weighted entry
    WeightedAverage,
}

/// One (symbol) position on a venue with independent long and short legs.
///
/// Invariant: an entry price is present exactly while the matching quantity
/// is nonzero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "long")]
    pub long_qty: Decimal,
    #[serde(rename = "short")]
    pub short_qty: Decimal,
    pub long_entry_price: Option<Decimal>,
    pub short_entry_price: Option<Decimal>,
}

impl Position {
    pub fn qty(&self, side: PositionSide) -> Decimal {
        match side {
            PositionSide::Long => self.long_qty,
            PositionSide::Short => self.short_qty,
        }
    }

    pub fn entry(&self, side: PositionSide) -> Option<Decimal> {
        match side {
            PositionSide::Long => self.long_entry_price,
            PositionSide::Short => self.short_entry_price,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.long_qty.is_zero() && self.short_qty.is_zero()
    }

    /// Add to one leg at `price`
    pub fn add(&mut self, side: PositionSide, amount: Decimal, price: Decimal, mode: EntryMode) {
        let (qty, entry) = match side {
            PositionSide::Long => (&mut self.long_qty, &mut self.long_entry_price),
            PositionSide::Short => (&mut self.short_qty, &mut self.short_entry_price),
        };
        *entry = match (*entry, mode) {
            (None, _) => Some(price),
            (Some(e), EntryMode::FirstOpen) => Some(e),
            (Some(e), EntryMode::WeightedAverage) => {
                Some((e * *qty + price * amount) / (*qty + amount))
            }
        };
        *qty += amount;
    }

    /// Reduce one leg; the entry price is cleared when the leg returns to zero
    pub fn reduce(&mut self, side: PositionSide, amount: Decimal) {
        match side {
            PositionSide::Long => {
                self.long_qty -= amount;
                if self.long_qty.is_zero() {
                    self.long_entry_price = None;
                }
            }
            PositionSide::Short => {
                self.short_qty -= amount;
                if self.short_qty.is_zero() {
                    self.short_entry_price = None;
                }
            }
        }
    }
}

/// Side recorded in the order history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeSide {
    Buy,
    Sell,
    CloseLong,
    CloseShort,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
            TradeSide::CloseLong => write!(f, "close-long"),
            TradeSide::CloseShort => write!(f, "close-short"),
        }
    }
}

/// One entry in a venue's order history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    #[serde(default)]
    pub pnl: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Result of closing one position leg
#[derive(Debug, Clone)]
pub struct CloseReceipt {
    pub symbol: String,
    pub side: PositionSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub entry_price: Decimal,
    pub pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Directional key naming an active paired trade: `{buy_venue}-{sell_venue}`
pub fn pair_key(buy_venue: &str, sell_venue: &str) -> String {
    format!("{}-{}", buy_venue, sell_venue)
}

/// A live paired trade registered by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPosition {
    pub buy_venue: String,
    pub sell_venue: String,
    pub amount: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// A detected arbitrage opportunity, produced per tick and consumed immediately
#[derive(Debug, Clone)]
pub enum Opportunity {
    Open(OpenOpportunity),
    Close(CloseOpportunity),
}

/// Two venues' prices diverged past the open threshold
#[derive(Debug, Clone)]
pub struct OpenOpportunity {
    pub symbol: String,
    pub buy_venue: String,
    pub buy_price: Decimal,
    pub sell_venue: String,
    pub sell_price: Decimal,
    pub spread_pct: Decimal,
}

/// An active pair's prices reconverged within the alignment threshold
#[derive(Debug, Clone)]
pub struct CloseOpportunity {
    pub symbol: String,
    pub buy_venue: String,
    pub buy_price: Decimal,
    pub sell_venue: String,
    pub sell_price: Decimal,
    pub amount: Decimal,
    pub pair_key: String,
}

/// A completed paired trade: both legs opened and closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTrip {
    pub id: String,
    pub symbol: String,
    pub pair_key: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub amount: Decimal,
    pub buy_entry: Decimal,
    pub buy_exit: Decimal,
    pub sell_entry: Decimal,
    pub sell_exit: Decimal,
    pub pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}
