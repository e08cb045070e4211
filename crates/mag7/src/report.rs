use colored::Colorize;
use mag7_warehouse::{MergedRow, Prediction, Signal};
use std::fmt::Write;

const HEADER: [&str; 12] = [
    "date",
    "close",
    "revenue",
    "net_income",
    "total_liabilities",
    "total_equity",
    "share_capital",
    "shares_outstanding",
    "market_cap",
    "p_e_ratio",
    "sma_50",
    "next_close",
];

fn cell(val: Option<f64>) -> String {
    match val {
        Some(val) if val.abs() >= 1e6 && val.is_finite() => format!("{val:.3e}"),
        Some(val) => format!("{val:.2}"),
        None => "-".to_string(),
    }
}

/// The last `n` rows as a fixed-width text table. Fiscal period & year are left out.
pub fn render_table(rows: &[MergedRow], n: usize) -> String {
    let mut out = String::new();
    for name in HEADER {
        let _ = write!(out, "{name:>18}");
    }
    out.push('\n');

    for row in &rows[rows.len().saturating_sub(n)..] {
        let _ = write!(out, "{:>18}", row.date.to_string());
        for val in [
            row.close,
            row.revenue,
            row.net_income,
            row.total_liabilities,
            row.total_equity,
            row.share_capital,
            row.shares_outstanding,
            row.market_capitalization,
            row.p_e_ratio,
            row.sma_50,
            row.next_close,
        ] {
            let _ = write!(out, "{:>18}", cell(val));
        }
        out.push('\n');
    }
    out
}

pub fn render_prediction(row: &MergedRow, prediction: &Prediction) -> String {
    let label = format!("{} ({})", prediction.signal, prediction.signal.movement());
    let label = match prediction.signal {
        Signal::Buy => label.green().bold(),
        Signal::Sell => label.red().bold(),
    };
    format!(
        "[{}] {}  close {}  p/e {}  sma_50 {}  => {label}  (score {:.4})",
        row.ticker,
        row.date,
        cell(row.close),
        cell(row.p_e_ratio),
        cell(row.sma_50),
        prediction.score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn row(n: i64) -> MergedRow {
        MergedRow {
            ticker: "AAPL".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(n),
            close: Some(100.0 + n as f64),
            fiscal_period: Some("Q1".into()),
            fiscal_year: Some(2025),
            revenue: Some(124_300_000_000.0),
            net_income: Some(36_330_000_000.0),
            total_liabilities: None,
            total_equity: None,
            share_capital: None,
            shares_outstanding: Some(15_000_000_000.0),
            market_capitalization: None,
            p_e_ratio: Some(f64::INFINITY),
            sma_50: Some(100.0),
            next_close: None,
        }
    }

    #[test]
    fn table_shows_trailing_rows() {
        let rows: Vec<_> = (0..15).map(row).collect();
        let table = render_table(&rows, 10);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 11);
        assert!(lines[0].contains("p_e_ratio"));
        assert!(!lines[0].contains("fiscal"));
        assert!(lines[1].contains("2025-01-06"));
        assert!(lines[10].contains("2025-01-15"));
        assert!(lines[10].contains("114.00"));
        assert!(lines[10].contains("1.243e11"));
        assert!(lines[10].contains("inf"));
    }

    #[test]
    fn short_tables_are_whole() {
        let rows: Vec<_> = (0..3).map(row).collect();
        assert_eq!(render_table(&rows, 10).lines().count(), 4);
        assert_eq!(render_table(&[], 10).lines().count(), 1);
    }

    #[test]
    fn prediction_line() {
        colored::control::set_override(false);
        let line = render_prediction(
            &row(0),
            &Prediction {
                score: 0.75,
                signal: Signal::Buy,
            },
        );
        assert!(line.starts_with("[AAPL] 2025-01-01"));
        assert!(line.contains("Buy (Up)"));
        assert!(line.contains("score 0.7500"));
    }
}
