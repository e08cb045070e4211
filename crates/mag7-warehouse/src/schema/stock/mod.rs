pub mod prices;
pub mod shares;
pub mod statements;

pub use prices::PriceRecord;
pub use shares::SharesOutstandingRecord;
pub use statements::{BalanceSheetRecord, IncomeRecord};
