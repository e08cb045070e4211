//! Joins the SimFin datasets of a ticker into one row per trading day, and
//! derives the model features from them.
//!
//! The steps run in order: [`merge`] -> [`forward_fill`] -> [`derive`] ->
//! [`drop_incomplete`]; [`build_features`] runs all four.

use crate::schema::stock::*;
use crate::simfin::Datasets;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::HashMap as Map;
use tracing::{debug, warn};

/// Trailing window of the simple moving average.
pub const SMA_WINDOW: usize = 50;

/// Date range of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// How the P/E ratio is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeMethod {
    /// `close * shares_outstanding / net_income`
    #[default]
    MarketCap,
    /// `close / (net_income / share_capital)`
    ShareCapital,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub fiscal_period: Option<String>,
    pub fiscal_year: Option<i32>,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub total_equity: Option<f64>,
    pub share_capital: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub market_capitalization: Option<f64>,
    pub p_e_ratio: Option<f64>,
    pub sma_50: Option<f64>,
    pub next_close: Option<f64>,
}

impl MergedRow {
    fn from_price(price: &PriceRecord) -> Self {
        Self {
            ticker: price.ticker.clone(),
            date: price.date,
            close: price.close,
            fiscal_period: None,
            fiscal_year: None,
            revenue: None,
            net_income: None,
            total_liabilities: None,
            total_equity: None,
            share_capital: None,
            shares_outstanding: None,
            market_capitalization: None,
            p_e_ratio: None,
            sma_50: None,
            next_close: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Records joined onto the price rows.
trait Keyed {
    fn key(&self) -> (&str, NaiveDate);
}

impl Keyed for IncomeRecord {
    fn key(&self) -> (&str, NaiveDate) {
        (&self.ticker, self.date)
    }
}

impl Keyed for BalanceSheetRecord {
    fn key(&self) -> (&str, NaiveDate) {
        (&self.ticker, self.date)
    }
}

impl Keyed for SharesOutstandingRecord {
    fn key(&self) -> (&str, NaiveDate) {
        (&self.ticker, self.date)
    }
}

/// Index `records` by (ticker, date); the first record of a key wins.
fn index_by_key<'a, T: Keyed>(records: &'a [T], dataset: &str) -> Map<(&'a str, NaiveDate), &'a T> {
    let mut map = Map::with_capacity(records.len());
    for record in records {
        let key = record.key();
        if map.contains_key(&key) {
            debug!("[{}] duplicate {dataset} record on {}; keeping the first", key.0, key.1);
            continue;
        }
        map.insert(key, record);
    }
    map
}

/// Left join the statement datasets onto the price rows on (ticker, date),
/// sorted by (ticker, date).
pub fn merge(
    prices: &[PriceRecord],
    income: &[IncomeRecord],
    balance: &[BalanceSheetRecord],
    shares: &[SharesOutstandingRecord],
) -> Vec<MergedRow> {
    let income = index_by_key(income, "income statement");
    let balance = index_by_key(balance, "balance sheet");
    let shares = index_by_key(shares, "shares outstanding");

    let mut rows: Vec<MergedRow> = prices
        .iter()
        .map(|price| {
            let mut row = MergedRow::from_price(price);
            let key = (price.ticker.as_str(), price.date);
            if let Some(inc) = income.get(&key) {
                row.fiscal_period = inc.fiscal_period.clone();
                row.fiscal_year = inc.fiscal_year;
                row.revenue = inc.revenue;
                row.net_income = inc.net_income;
            }
            if let Some(bs) = balance.get(&key) {
                row.total_liabilities = bs.total_liabilities;
                row.total_equity = bs.total_equity;
                row.share_capital = bs.share_capital;
            }
            if let Some(so) = shares.get(&key) {
                row.shares_outstanding = so.shares_outstanding;
            }
            row
        })
        .collect();

    rows.sort_by(|a, b| (&a.ticker, a.date).cmp(&(&b.ticker, b.date)));
    rows
}

/// Within each ticker, fill every missing field with its latest earlier value.
///
/// Rows must already be sorted by (ticker, date).
pub fn forward_fill(rows: &mut [MergedRow]) {
    fn fill<T: Clone>(field: &mut Option<T>, prev: &Option<T>) {
        if field.is_none() {
            field.clone_from(prev);
        }
    }

    for i in 1..rows.len() {
        let (head, tail) = rows.split_at_mut(i);
        let (prev, row) = (&head[i - 1], &mut tail[0]);
        if prev.ticker != row.ticker {
            continue;
        }
        fill(&mut row.close, &prev.close);
        fill(&mut row.fiscal_period, &prev.fiscal_period);
        fill(&mut row.fiscal_year, &prev.fiscal_year);
        fill(&mut row.revenue, &prev.revenue);
        fill(&mut row.net_income, &prev.net_income);
        fill(&mut row.total_liabilities, &prev.total_liabilities);
        fill(&mut row.total_equity, &prev.total_equity);
        fill(&mut row.share_capital, &prev.share_capital);
        fill(&mut row.shares_outstanding, &prev.shares_outstanding);
    }
}

/// Compute market capitalisation, P/E ratio, the 50-day SMA & the next-day close.
///
/// Net income is used as a divisor unguarded, so a zero or negative value
/// gives an infinite or negative P/E.
pub fn derive(rows: &mut [MergedRow], pe_method: PeMethod) {
    for row in rows.iter_mut() {
        row.market_capitalization = row.close.zip(row.shares_outstanding).map(|(c, s)| c * s);
        row.p_e_ratio = match pe_method {
            PeMethod::MarketCap => row
                .market_capitalization
                .zip(row.net_income)
                .map(|(cap, ni)| cap / ni),
            PeMethod::ShareCapital => match (row.close, row.net_income, row.share_capital) {
                (Some(close), Some(ni), Some(sc)) => Some(close / (ni / sc)),
                _ => None,
            },
        };
    }

    let mut start = 0;
    while start < rows.len() {
        let ticker = rows[start].ticker.clone();
        let len = rows[start..]
            .iter()
            .take_while(|row| row.ticker == ticker)
            .count();
        let group = &mut rows[start..start + len];

        let closes: Vec<Option<f64>> = group.iter().map(|row| row.close).collect();
        let sma = rolling_mean(&closes, SMA_WINDOW);
        for (i, row) in group.iter_mut().enumerate() {
            row.sma_50 = sma[i];
            row.next_close = closes.get(i + 1).copied().flatten();
        }

        start += len;
    }
}

/// Trailing mean over up to `window` values, skipping missing ones; the first
/// `window - 1` positions use however many values exist so far.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let from = (i + 1).saturating_sub(window);
            let (sum, count) = values[from..=i]
                .iter()
                .flatten()
                .filter(|val| !val.is_nan())
                .fold((0.0, 0usize), |(sum, count), val| (sum + val, count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

fn missing(val: Option<f64>) -> bool {
    val.map_or(true, f64::is_nan)
}

/// Drop rows with a missing close, P/E ratio or SMA. NaN counts as missing; infinity does not.
pub fn drop_incomplete(rows: Vec<MergedRow>) -> Vec<MergedRow> {
    let before = rows.len();
    let rows: Vec<MergedRow> = rows
        .into_iter()
        .filter(|row| !(missing(row.close) || missing(row.p_e_ratio) || missing(row.sma_50)))
        .collect();
    debug!("dropped {} incomplete rows", before - rows.len());
    rows
}

/// Run the full pipeline over one fetch.
pub fn build_features(datasets: &Datasets, pe_method: PeMethod) -> Vec<MergedRow> {
    let mut rows = merge(
        &datasets.prices,
        &datasets.income,
        &datasets.balance,
        &datasets.shares,
    );
    forward_fill(&mut rows);
    derive(&mut rows, pe_method);
    drop_incomplete(rows)
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// The 365 days up to and including `end`.
pub fn window_ending(end: NaiveDate) -> Window {
    Window {
        start: end - Duration::days(365),
        end,
    }
}

/// The 365 days before `today`, ending on the previous trading day.
///
/// Monday & Sunday look back to Friday; every other day uses yesterday.
pub fn trading_window(today: NaiveDate) -> Window {
    let back = match today.weekday() {
        Weekday::Mon => 3,
        Weekday::Sun => 2,
        _ => 1,
    };
    Window {
        start: today - Duration::days(365),
        end: today - Duration::days(back),
    }
}

/// The row of `ticker` dated `date`; falls back to the ticker's latest row
/// when asked to.
pub fn select_scoring_row<'a>(
    rows: &'a [MergedRow],
    ticker: &str,
    date: NaiveDate,
    fallback_latest: bool,
) -> Option<&'a MergedRow> {
    let rows: Vec<&MergedRow> = rows
        .iter()
        .filter(|row| row.ticker.eq_ignore_ascii_case(ticker))
        .collect();
    if let Some(row) = rows.iter().find(|row| row.date == date) {
        return Some(*row);
    }
    if !fallback_latest {
        return None;
    }

    let latest = rows.into_iter().max_by_key(|row| row.date)?;
    warn!(
        "[{ticker}] no data found for {date}; using latest available date {}",
        latest.date
    );
    Some(latest)
}
