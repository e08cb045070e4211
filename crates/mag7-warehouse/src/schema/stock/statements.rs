use crate::schema::common::*;
use crate::simfin::{or_empty, window_query, SimFin};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Financial statements (income statement & balance sheet), per ticker
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// SimFin statement codes.
const INCOME: &str = "PL";
const BALANCE: &str = "BS";

impl SimFin {
    /// Income statements of `ticker` reported between `start` and `end`.
    pub async fn get_income_statement(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<IncomeRecord> {
        or_empty(
            self.try_get_statement(INCOME, ticker, start, end).await,
            ticker,
            IncomeRecord::DATASET,
        )
    }

    /// Balance sheets of `ticker` reported between `start` and `end`.
    pub async fn get_balance_sheet(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<BalanceSheetRecord> {
        or_empty(
            self.try_get_statement(BALANCE, ticker, start, end).await,
            ticker,
            BalanceSheetRecord::DATASET,
        )
    }

    pub async fn try_get_statement<T: FromCompact>(
        &self,
        statement: &str,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<T>> {
        trace!("fetching {} for [{ticker}] from SimFin", T::DATASET);
        let mut query = window_query(ticker, start, end);
        query.push(("statements", statement.to_string()));
        let companies: Vec<CompanyStatements> =
            self.get_json("companies/statements/compact", &query).await?;

        let mut output = vec![];
        for company in companies {
            let ticker = company.ticker.as_deref().unwrap_or(ticker);
            for table in company.statements {
                if !table.statement.eq_ignore_ascii_case(statement) {
                    debug!("[{ticker}] skipping unrequested statement {}", table.statement);
                    continue;
                }
                output.extend(T::from_table(ticker, &table.table)?);
            }
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
pub struct IncomeRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub fiscal_period: Option<String>,
    pub fiscal_year: Option<i32>,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
}

impl FromCompact for IncomeRecord {
    const DATASET: &'static str = "income statement";

    fn from_table(ticker: &str, table: &Compact) -> anyhow::Result<Vec<Self>> {
        let cols = Columns::new(&table.columns);
        let date = cols.index("Report Date")?;
        let period = cols.index("Fiscal Period")?;
        let year = cols.index("Fiscal Year")?;
        let revenue = cols.index("Revenue")?;
        let net_income = cols.index("Net Income")?;

        table
            .data
            .iter()
            .map(|row| {
                Ok(IncomeRecord {
                    ticker: ticker.to_uppercase(),
                    date: cell_date(row, date)?,
                    fiscal_period: cell_str(row, period),
                    fiscal_year: cell_i32(row, year)?,
                    revenue: cell_f64(row, revenue)?,
                    net_income: cell_f64(row, net_income)?,
                })
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BalanceSheetRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub total_liabilities: Option<f64>,
    pub total_equity: Option<f64>,
    pub share_capital: Option<f64>,
}

impl FromCompact for BalanceSheetRecord {
    const DATASET: &'static str = "balance sheet";

    fn from_table(ticker: &str, table: &Compact) -> anyhow::Result<Vec<Self>> {
        let cols = Columns::new(&table.columns);
        let date = cols.index("Report Date")?;
        let liabilities = cols.index("Total Liabilities")?;
        let equity = cols.index("Total Equity")?;
        let share_capital = cols.index("Share Capital & Additional Paid-In Capital")?;

        table
            .data
            .iter()
            .map(|row| {
                Ok(BalanceSheetRecord {
                    ticker: ticker.to_uppercase(),
                    date: cell_date(row, date)?,
                    total_liabilities: cell_f64(row, liabilities)?,
                    total_equity: cell_f64(row, equity)?,
                    share_capital: cell_f64(row, share_capital)?,
                })
            })
            .collect()
    }
}

// Input: one entry per company, one table per requested statement
//
// [
//      {
//          "id": 111052,
//          "name": "APPLE INC",
//          "ticker": "AAPL",
//          "statements": [
//              { "statement": "PL", "columns": [...], "data": [[...], ...] }
//          ]
//      }
// ]
#[derive(Deserialize, Debug)]
pub(crate) struct CompanyStatements {
    ticker: Option<String>,
    #[serde(default)]
    statements: Vec<StatementTable>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct StatementTable {
    statement: String,
    #[serde(flatten)]
    table: Compact,
}
