pub mod exchange;
pub mod storage;

pub use exchange::{ExchangeError, ExchangeSimulator};
pub use storage::{SimulatorState, SnapshotError, SnapshotStore};
