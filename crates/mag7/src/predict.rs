use mag7_warehouse::pipeline::{build_features, select_scoring_row, Window};
use mag7_warehouse::{Booster, MergedRow, ModelError, PeMethod, Prediction, SimFin};
use tracing::{debug, info, warn};

/// What came of one ticker in a `predict` run.
#[derive(Debug)]
pub enum Outcome {
    /// A dataset the P/E method needs came back empty; nothing was merged.
    NoData,
    /// Merged, but there is no row to score for the window's end date.
    Unscored { merged: Vec<MergedRow> },
    Scored {
        merged: Vec<MergedRow>,
        row: MergedRow,
        prediction: Prediction,
    },
}

impl Outcome {
    /// Merged rows, for display & export.
    pub fn merged(&self) -> &[MergedRow] {
        match self {
            Outcome::NoData => &[],
            Outcome::Unscored { merged } | Outcome::Scored { merged, .. } => merged,
        }
    }

    pub fn into_merged(self) -> Vec<MergedRow> {
        match self {
            Outcome::NoData => vec![],
            Outcome::Unscored { merged } | Outcome::Scored { merged, .. } => merged,
        }
    }
}

/// Fetch, merge & score a single ticker.
///
/// Vendor failures degrade to [`Outcome::NoData`]; only a model error is returned.
pub async fn predict_ticker(
    client: &SimFin,
    booster: &Booster,
    ticker: &str,
    window: &Window,
    fallback_latest: bool,
    pe_method: PeMethod,
) -> Result<Outcome, ModelError> {
    let datasets = client.fetch_all(ticker, window).await;
    if !datasets.is_complete(pe_method) {
        warn!("[{ticker}] no stock data available");
        return Ok(Outcome::NoData);
    }

    let merged = build_features(&datasets, pe_method);
    debug!("[{ticker}] {} merged rows", merged.len());

    let row = match select_scoring_row(&merged, ticker, window.end, fallback_latest) {
        Some(row) => row.clone(),
        None => {
            warn!("[{ticker}] no data available for {}", window.end);
            return Ok(Outcome::Unscored { merged });
        }
    };

    let prediction = booster.score(&row)?;
    info!("[{ticker}] prediction generated: {}", prediction.signal);
    Ok(Outcome::Scored {
        merged,
        row,
        prediction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mag7_warehouse::Signal;
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::Duration;

    // close < 500 ? 0.4 : -0.4
    const MODEL: &str = r#"{
        "learner": {
            "feature_names": ["close", "p_e_ratio", "sma_50"],
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "tree_info": [0],
                    "trees": [{
                        "left_children": [1, -1, -1],
                        "right_children": [2, -1, -1],
                        "split_indices": [0, 0, 0],
                        "split_conditions": [500.0, 0.4, -0.4],
                        "default_left": [0, 0, 0]
                    }]
                }
            },
            "learner_model_param": {"base_score": "5E-1", "num_class": "0"},
            "objective": {"name": "binary:logistic"}
        }
    }"#;

    fn window() -> Window {
        Window {
            start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        }
    }

    fn ticker_is(ticker: &str) -> Matcher {
        Matcher::UrlEncoded("ticker".into(), ticker.into())
    }

    fn statement_is(ticker: &str, code: &str) -> Matcher {
        Matcher::AllOf(vec![
            ticker_is(ticker),
            Matcher::UrlEncoded("statements".into(), code.into()),
        ])
    }

    async fn mock_complete(server: &mut ServerGuard, ticker: &str) {
        server
            .mock("GET", "/companies/prices/compact")
            .match_query(ticker_is(ticker))
            .with_status(200)
            .with_body(format!(
                r#"[{{"ticker":"{ticker}","columns":["Date","Last Closing Price"],
                     "data":[["2024-03-28",421.43],["2024-04-01",424.57],["2024-04-02",421.44]]}}]"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/companies/statements/compact")
            .match_query(statement_is(ticker, "PL"))
            .with_status(200)
            .with_body(format!(
                r#"[{{"ticker":"{ticker}","statements":[{{"statement":"PL",
                     "columns":["Report Date","Fiscal Period","Fiscal Year","Revenue","Net Income"],
                     "data":[["2024-03-28","Q3",2024,61858000000,21939000000]]}}]}}]"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/companies/statements/compact")
            .match_query(statement_is(ticker, "BS"))
            .with_status(200)
            .with_body(format!(
                r#"[{{"ticker":"{ticker}","statements":[{{"statement":"BS",
                     "columns":["Report Date","Total Liabilities","Total Equity",
                                "Share Capital & Additional Paid-In Capital"],
                     "data":[["2024-03-28",231123000000,253152000000,97480000000]]}}]}}]"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/companies/common-shares-outstanding")
            .match_query(ticker_is(ticker))
            .with_status(200)
            .with_body(r#"[{"endOfPeriod":"2024-03-28","value":7431500000}]"#)
            .create_async()
            .await;
    }

    async fn client(server: &Server) -> SimFin {
        SimFin::builder("key")
            .base_url(server.url())
            .request_interval(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn failed_ticker_is_skipped_and_the_next_is_scored() {
        let mut server = Server::new_async().await;
        // AAPL prices fail; its remaining requests match no mock and fail too
        server
            .mock("GET", "/companies/prices/compact")
            .match_query(ticker_is("AAPL"))
            .with_status(500)
            .create_async()
            .await;
        mock_complete(&mut server, "MSFT").await;

        let client = client(&server).await;
        let booster = Booster::from_json(MODEL).unwrap();
        let window = window();

        let mut outcomes = vec![];
        for ticker in ["AAPL", "MSFT"] {
            let outcome = predict_ticker(
                &client,
                &booster,
                ticker,
                &window,
                false,
                PeMethod::MarketCap,
            )
            .await
            .unwrap();
            outcomes.push(outcome);
        }

        assert!(matches!(outcomes[0], Outcome::NoData));
        assert!(outcomes[0].merged().is_empty());

        match &outcomes[1] {
            Outcome::Scored {
                merged,
                row,
                prediction,
            } => {
                assert_eq!(merged.len(), 3);
                assert_eq!(row.ticker, "MSFT");
                assert_eq!(row.date, window.end);
                assert_eq!(prediction.signal, Signal::Buy);
                assert!((prediction.score - 1.0 / (1.0 + (-0.4f64).exp())).abs() < 1e-6);
            }
            other => panic!("expected MSFT to be scored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_scoring_date_is_unscored_unless_falling_back() {
        let mut server = Server::new_async().await;
        mock_complete(&mut server, "MSFT").await;

        let client = client(&server).await;
        let booster = Booster::from_json(MODEL).unwrap();
        let window = Window {
            end: NaiveDate::from_ymd_opt(2024, 4, 3).unwrap(),
            ..window()
        };

        let outcome = predict_ticker(
            &client,
            &booster,
            "MSFT",
            &window,
            false,
            PeMethod::MarketCap,
        )
        .await
        .unwrap();
        assert!(matches!(&outcome, Outcome::Unscored { merged } if merged.len() == 3));

        let outcome = predict_ticker(
            &client,
            &booster,
            "MSFT",
            &window,
            true,
            PeMethod::MarketCap,
        )
        .await
        .unwrap();
        match outcome {
            Outcome::Scored { row, .. } => {
                assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 4, 2).unwrap())
            }
            other => panic!("expected a fallback score, got {other:?}"),
        }
    }
}
