pub mod model;
pub mod pipeline;
pub mod schema;
pub mod simfin;

pub use model::{Booster, ModelError, Prediction, Signal};
pub use pipeline::{MergedRow, PeMethod, Window};
pub use schema::stock::{BalanceSheetRecord, IncomeRecord, PriceRecord, SharesOutstandingRecord};
pub use simfin::{Datasets, SimFin};

/// The default ticker universe: the "Magnificent 7".
pub static MAG7: [&str; 7] = ["AAPL", "MSFT", "GOOG", "AMZN", "NVDA", "META", "TSLA"];
