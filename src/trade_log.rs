use crate::config::LoggingConfig;
use crate::types::RoundTrip;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Logs completed round trips to CSV, JSONL, and SQLite
pub struct TradeLogger {
    csv_path: String,
    json_path: String,
    csv_initialized: bool,
    db: Arc<Mutex<Connection>>,
    completed: Vec<RoundTrip>,
}

impl TradeLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        for path in [
            &config.trades_csv_path,
            &config.trades_json_path,
            &config.trades_db_path,
        ] {
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let conn = Connection::open(&config.trades_db_path).unwrap_or_else(|e| {
            error!("Failed to open SQLite database: {}", e);
            panic!("Cannot continue without database");
        });

        if let Err(e) = conn.execute(
            "CREATE TABLE IF NOT EXISTS round_trips (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                pair_key TEXT NOT NULL,
                buy_venue TEXT NOT NULL,
                sell_venue TEXT NOT NULL,
                amount REAL NOT NULL,
                buy_entry REAL NOT NULL,
                buy_exit REAL NOT NULL,
                sell_entry REAL NOT NULL,
                sell_exit REAL NOT NULL,
                pnl REAL NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            error!("Failed to create round_trips table: {}", e);
            panic!("Cannot continue without database schema");
        }

        if let Err(e) = conn.execute(
            "CREATE TABLE IF NOT EXISTS run_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_trips INTEGER NOT NULL,
                winners INTEGER NOT NULL,
                losers INTEGER NOT NULL,
                win_rate_pct REAL NOT NULL,
                total_pnl REAL NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            error!("Failed to create run_summary table: {}", e);
            panic!("Cannot continue without summary schema");
        }

        info!("Round-trip database initialized at: {}", config.trades_db_path);

        Self {
            csv_path: config.trades_csv_path.clone(),
            json_path: config.trades_json_path.clone(),
            csv_initialized: false,
            db: Arc::new(Mutex::new(conn)),
            completed: Vec::new(),
        }
    }

    /// Record one closed paired trade in all three sinks
    pub fn log_round_trip(&mut self, round_trip: &RoundTrip) {
        self.log_csv(round_trip);
        self.log_json(round_trip);
        self.log_sqlite(round_trip);
        self.completed.push(round_trip.clone());
    }

    fn log_csv(&mut self, round_trip: &RoundTrip) {
        let writer = if !self.csv_initialized {
            self.csv_initialized = true;
            File::create(&self.csv_path)
                .map(|f| csv::WriterBuilder::new().has_headers(true).from_writer(f))
        } else {
            OpenOptions::new()
                .append(true)
                .open(&self.csv_path)
                .map(|f| csv::WriterBuilder::new().has_headers(false).from_writer(f))
        };

        match writer {
            Ok(mut w) => {
                if let Err(e) = w.serialize(round_trip) {
                    error!("Failed to write round trip to CSV: {}", e);
                }
                let _ = w.flush();
            }
            Err(e) => error!("Failed to open CSV file: {}", e),
        }
    }

    fn log_json(&self, round_trip: &RoundTrip) {
        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.json_path)
        {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open JSONL file: {}", e);
                return;
            }
        };

        match serde_json::to_string(round_trip) {
            Ok(json) => {
                let _ = writeln!(file, "{}", json);
            }
            Err(e) => error!("Failed to serialize round trip: {}", e),
        }
    }

    fn log_sqlite(&self, round_trip: &RoundTrip) {
        let db = match self.db.lock() {
            Ok(db) => db,
            Err(e) => {
                error!("Failed to acquire database lock: {}", e);
                return;
            }
        };

        if let Err(e) = db.execute(
            "INSERT INTO round_trips (
                id, symbol, pair_key, buy_venue, sell_venue, amount,
                buy_entry, buy_exit, sell_entry, sell_exit, pnl, opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                round_trip.id,
                round_trip.symbol,
                round_trip.pair_key,
                round_trip.buy_venue,
                round_trip.sell_venue,
                round_trip.amount.to_string(),
                round_trip.buy_entry.to_string(),
                round_trip.buy_exit.to_string(),
                round_trip.sell_entry.to_string(),
                round_trip.sell_exit.to_string(),
                round_trip.pnl.to_string(),
                round_trip.opened_at.to_rfc3339(),
                round_trip.closed_at.to_rfc3339(),
            ],
        ) {
            error!("Failed to insert round trip into database: {}", e);
        }
    }

    fn log_summary_sqlite(&self, winners: usize, losers: usize, win_rate: Decimal, total: Decimal) {
        let db = match self.db.lock() {
            Ok(db) => db,
            Err(e) => {
                error!("Failed to acquire database lock for summary: {}", e);
                return;
            }
        };

        if let Err(e) = db.execute(
            "INSERT INTO run_summary (round_trips, winners, losers, win_rate_pct, total_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.completed.len() as i64,
                winners as i64,
                losers as i64,
                win_rate.to_string(),
                total.to_string(),
            ],
        ) {
            error!("Failed to insert run summary into database: {}", e);
        }
    }

    /// Print summary stats for the run
    pub fn print_summary(&self) {
        if self.completed.is_empty() {
            info!("No round trips to summarize");
            return;
        }

        let total: Decimal = self.completed.iter().map(|r| r.pnl).sum();
        let winners = self.completed.iter().filter(|r| r.pnl > Decimal::ZERO).count();
        let losers = self.completed.iter().filter(|r| r.pnl < Decimal::ZERO).count();
        let win_rate = Decimal::from(winners as u64) * Decimal::ONE_HUNDRED
            / Decimal::from(self.completed.len() as u64);

        self.log_summary_sqlite(winners, losers, win_rate, total);

        info!("=== Round-Trip Summary ===");
        info!("Round trips: {}", self.completed.len());
        info!("Winners: {} | Losers: {}", winners, losers);
        info!("Win rate: {}%", win_rate.round_dp(2));
        info!("Total PnL: {}", total.round_dp(8));
        info!("==========================");
    }
}
