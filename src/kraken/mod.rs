pub mod client;

pub use client::{KrakenFuturesClient, Ticker};
