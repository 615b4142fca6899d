pub mod replay;
pub mod types;

pub use replay::ReplayFeed;
pub use types::{decode, FeedError, TickMessage};
