use crate::types::{OrderRecord, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Full durable state of one venue simulator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatorState {
    pub real_balance: BTreeMap<String, Decimal>,
    pub loaned_balance: BTreeMap<String, Decimal>,
    pub positions: BTreeMap<String, Position>,
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Snapshot encoding failed at {path}: {source}")]
    Serde {
        path: String,
        source: serde_json::Error,
    },
}

/// Owns one venue's snapshot file. Writes go to a temp file first and are
/// renamed into place so a reader never observes a torn snapshot.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(storage_dir: &Path, venue: &str) -> Result<Self, SnapshotError> {
        std::fs::create_dir_all(storage_dir).map_err(|source| SnapshotError::Io {
            path: storage_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: storage_dir.join(format!("{}_state.json", venue)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last snapshot, or `None` when no snapshot exists yet
    pub fn load(&self) -> Result<Option<SimulatorState>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| SnapshotError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let state = serde_json::from_str(&content).map_err(|source| SnapshotError::Serde {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Replace the snapshot with `state`
    pub fn save(&self, state: &SimulatorState) -> Result<(), SnapshotError> {
        let encoded =
            serde_json::to_string_pretty(state).map_err(|source| SnapshotError::Serde {
                path: self.path.display().to_string(),
                source,
            })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, encoded).map_err(|source| SnapshotError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| SnapshotError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("arbo-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    fn sample_state() -> SimulatorState {
        let mut state = SimulatorState::default();
        state.real_balance.insert("USD".to_string(), dec!(9989.94));
        state.loaned_balance.insert("USD".to_string(), dec!(90));
        state.positions.insert(
            "BTC/USD".to_string(),
            Position {
                long_qty: dec!(1),
                short_qty: Decimal::ZERO,
                long_entry_price: Some(dec!(100)),
                short_entry_price: None,
            },
        );
        state.orders.push(OrderRecord {
            id: "7f1b".to_string(),
            symbol: "BTC/USD".to_string(),
            side: TradeSide::Buy,
            amount: dec!(1),
            price: dec!(100),
            fee: dec!(0.1),
            pnl: None,
            created_at: Utc::now(),
        });
        state
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = temp_dir("roundtrip");
        let store = SnapshotStore::new(&dir, "binance").unwrap();
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_without_snapshot_is_none() {
        let dir = temp_dir("empty");
        let store = SnapshotStore::new(&dir, "bybit").unwrap();
        assert!(store.load().unwrap().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = temp_dir("tmpfile");
        let store = SnapshotStore::new(&dir, "binance").unwrap();
        store.save(&sample_state()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["binance_state.json".to_string()]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = temp_dir("overwrite");
        let store = SnapshotStore::new(&dir, "binance").unwrap();

        store.save(&sample_state()).unwrap();
        let mut updated = sample_state();
        updated.real_balance.insert("USD".to_string(), dec!(500));
        store.save(&updated).unwrap();

        assert_eq!(store.load().unwrap().unwrap(), updated);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
