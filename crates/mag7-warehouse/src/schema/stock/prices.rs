use crate::schema::common::*;
use crate::simfin::{or_empty, window_query, SimFin};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::trace;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Daily share prices, per ticker
//
////////////////////////////////////////////////////////////////////////////////////////////////////

impl SimFin {
    /// Daily closing prices of `ticker` between `start` and `end` (inclusive).
    ///
    /// Never fails: any error is logged and an empty set returned in its place.
    pub async fn get_share_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<PriceRecord> {
        or_empty(
            self.try_get_share_prices(ticker, start, end).await,
            ticker,
            PriceRecord::DATASET,
        )
    }

    pub async fn try_get_share_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<PriceRecord>> {
        trace!("fetching price data for [{ticker}] from SimFin");
        let query = window_query(ticker, start, end);
        let companies: Vec<CompanyPrices> =
            self.get_json("companies/prices/compact", &query).await?;

        let mut output = vec![];
        for company in companies {
            let ticker = company.ticker.as_deref().unwrap_or(ticker);
            output.extend(PriceRecord::from_table(ticker, &company.table)?);
        }
        Ok(output)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// Output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: Option<f64>,
}

impl FromCompact for PriceRecord {
    const DATASET: &'static str = "share prices";

    fn from_table(ticker: &str, table: &Compact) -> anyhow::Result<Vec<Self>> {
        let cols = Columns::new(&table.columns);
        let (date, close) = (cols.index("Date")?, cols.index("Last Closing Price")?);

        table
            .data
            .iter()
            .map(|row| {
                Ok(PriceRecord {
                    ticker: ticker.to_uppercase(),
                    date: cell_date(row, date)?,
                    close: cell_f64(row, close)?,
                })
            })
            .collect()
    }
}

// Input: one entry per company
//
// [
//      {
//          "name": "APPLE INC",
//          "id": 111052,
//          "ticker": "AAPL",
//          "currency": "USD",
//          "columns": [...],
//          "data": [[...], ...]
//      }
// ]
#[derive(Deserialize, Debug)]
pub(crate) struct CompanyPrices {
    ticker: Option<String>,
    #[serde(flatten)]
    table: Compact,
}
