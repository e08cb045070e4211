use crate::schema::common::{cell_f64, convert_date_type};
use crate::simfin::{or_empty, window_query, SimFin};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Common shares outstanding, per ticker
//
////////////////////////////////////////////////////////////////////////////////////////////////////

const DATASET: &str = "shares outstanding";

impl SimFin {
    pub async fn get_shares_outstanding(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<SharesOutstandingRecord> {
        or_empty(
            self.try_get_shares_outstanding(ticker, start, end).await,
            ticker,
            DATASET,
        )
    }

    pub async fn try_get_shares_outstanding(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<SharesOutstandingRecord>> {
        trace!("fetching {DATASET} for [{ticker}] from SimFin");
        let query = window_query(ticker, start, end);
        let cells: Vec<SharesCell> = self
            .get_json("companies/common-shares-outstanding", &query)
            .await?;

        cells
            .into_iter()
            .map(|cell| {
                Ok(SharesOutstandingRecord {
                    ticker: ticker.to_uppercase(),
                    date: convert_date_type(&cell.dated)?,
                    shares_outstanding: cell_f64(std::slice::from_ref(&cell.value), 0)?,
                })
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// Output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SharesOutstandingRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub shares_outstanding: Option<f64>,
}

// Input
//
// [
//      { "endOfPeriod": "2024-03-31", "value": 15337686000 },
//      ...
// ]
#[derive(Deserialize, Debug)]
pub(crate) struct SharesCell {
    #[serde(rename = "endOfPeriod", alias = "date")]
    dated: String,
    #[serde(default)]
    value: Value,
}
