//! Market data collaborators.
//!
//! - `types`: candles, timeframes and quotes
//! - `traits`: the `MarketData` source consumed by the scanning core
//! - `mock`: in-memory store and a no-look-ahead replay view
//! - `csv`: candle import from CSV files

mod csv;
pub mod mock;
mod traits;
mod types;

pub use self::csv::{load_csv_candles, parse_csv_candles};
pub use mock::{MemoryMarketData, ReplayMarketData};
pub use traits::MarketData;
#[cfg(test)]
pub use traits::MockMarketData;
pub use types::*;
