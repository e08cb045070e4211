use crate::pipeline::{PeMethod, Window};
use crate::schema::stock::*;
use chrono::NaiveDate;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, trace, warn};

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// API Documentation: https://simfin.readme.io/reference
//
////////////////////////////////////////////////////////////////////////////////////////////////////

pub type HttpClient = reqwest::Client;

pub static BASE_URL: &str = "https://backend.simfin.com/api/v3";

/// The free tier allows 2 requests per second.
pub const REQUEST_INTERVAL: Duration = Duration::from_millis(500);

pub struct SimFin {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

pub struct SimFinBuilder {
    api_key: String,
    base_url: String,
    interval: Duration,
    user_agent: Option<String>,
}

impl SimFinBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn request_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> anyhow::Result<SimFin> {
        let mut builder = reqwest::ClientBuilder::new();
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let http_client = builder.build().map_err(|e| {
            error!("failed to build reqwest client: {e}");
            e
        })?;

        Ok(SimFin {
            http_client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key,
            interval: self.interval,
            last_request: Mutex::new(None),
        })
    }
}

impl SimFin {
    pub fn builder(api_key: impl Into<String>) -> SimFinBuilder {
        SimFinBuilder {
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            interval: REQUEST_INTERVAL,
            user_agent: None,
        }
    }

    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::builder(api_key).build()
    }

    /// Fetch every dataset the feature pipeline needs for `ticker`, one request at a time.
    pub async fn fetch_all(&self, ticker: &str, window: &Window) -> Datasets {
        let (start, end) = (window.start, window.end);
        debug!("fetching [{ticker}] datasets for {start} -> {end}");
        Datasets {
            prices: self.get_share_prices(ticker, start, end).await,
            income: self.get_income_statement(ticker, start, end).await,
            balance: self.get_balance_sheet(ticker, start, end).await,
            shares: self.get_shares_outstanding(ticker, start, end).await,
        }
    }

    /// Wait out the remainder of the request interval since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                trace!("rate limit: sleeping {} ms", wait.as_millis());
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Authenticated, rate-limited GET of `{base_url}/{path}`, deserialized as `T`.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        self.throttle().await;

        let url = format!("{}/{path}", self.base_url);
        trace!("GET {url} {query:?}");
        let response = self
            .http_client
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, format!("api-key {}", self.api_key))
            .send()
            .await
            .map_err(|e| {
                error!("SimFin request error: {e}\nURL: {url}");
                e
            })?
            .error_for_status()
            .map_err(|e| {
                error!("SimFin responded with an error status: {e}\nURL: {url}");
                e
            })?
            .bytes()
            .await?;

        let de = serde_json::from_slice::<T>(&response).map_err(|e| {
            error!("SimFin deserialization error: {e}\nURL: {url}");
            e
        })?;
        Ok(de)
    }
}

/// `ticker`, `start` & `end` query parameters shared by every endpoint.
pub(crate) fn window_query(
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(&'static str, String)> {
    vec![
        ("ticker", ticker.to_uppercase()),
        ("start", start.to_string()),
        ("end", end.to_string()),
    ]
}

/// Swallow a failed fetch into an empty dataset, logging why.
pub(crate) fn or_empty<T>(result: anyhow::Result<Vec<T>>, ticker: &str, dataset: &str) -> Vec<T> {
    match result {
        Ok(data) => {
            debug!("[{ticker}] {} {dataset} rows fetched", data.len());
            data
        }
        Err(e) => {
            warn!(
                "[{ticker}] failed to extract {dataset} data; filling with an empty array instead: {e:#}"
            );
            vec![]
        }
    }
}

/// Everything fetched for a single ticker.
#[derive(Debug, Default)]
pub struct Datasets {
    pub prices: Vec<PriceRecord>,
    pub income: Vec<IncomeRecord>,
    pub balance: Vec<BalanceSheetRecord>,
    pub shares: Vec<SharesOutstandingRecord>,
}

impl Datasets {
    /// True when none of the datasets `pe_method` reads came back empty.
    ///
    /// Share counts only feed the market-cap P/E, so [`PeMethod::ShareCapital`]
    /// scores without them.
    pub fn is_complete(&self, pe_method: PeMethod) -> bool {
        let shares_needed = pe_method == PeMethod::MarketCap;
        !(self.prices.is_empty()
            || self.income.is_empty()
            || self.balance.is_empty()
            || (shares_needed && self.shares.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn sends_api_key_and_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/companies/prices/compact")
            .match_header("authorization", "api-key secret")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ticker".into(), "AAPL".into()),
                Matcher::UrlEncoded("start".into(), "2024-01-01".into()),
                Matcher::UrlEncoded("end".into(), "2024-12-31".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = SimFin::builder("secret")
            .base_url(server.url())
            .request_interval(Duration::ZERO)
            .build()
            .unwrap();
        let query = window_query(
            "aapl",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        );
        let body: Vec<serde_json::Value> = client
            .get_json("companies/prices/compact", &query)
            .await
            .unwrap();

        assert!(body.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/companies/prices/compact")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":"invalid api key"}"#)
            .create_async()
            .await;

        let client = SimFin::builder("bad")
            .base_url(server.url())
            .request_interval(Duration::ZERO)
            .build()
            .unwrap();
        let result: anyhow::Result<Vec<serde_json::Value>> =
            client.get_json("companies/prices/compact", &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn requests_are_spaced_by_the_interval() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("[]")
            .expect(3)
            .create_async()
            .await;

        let client = SimFin::builder("key")
            .base_url(format!("{}/", server.url()))
            .request_interval(Duration::from_millis(60))
            .build()
            .unwrap();

        let time = Instant::now();
        for _ in 0..3 {
            let _: Vec<u8> = client.get_json("ping", &[]).await.unwrap();
        }
        assert!(time.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn fetch_all_feeds_the_pipeline() {
        use crate::pipeline::build_features;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/companies/prices/compact")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"ticker":"AAPL","columns":["Date","Last Closing Price"],
                     "data":[["2024-03-28",171.48],["2024-04-01",170.03],["2024-04-02",168.84]]}]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/companies/statements/compact")
            .match_query(Matcher::UrlEncoded("statements".into(), "PL".into()))
            .with_status(200)
            .with_body(
                r#"[{"ticker":"AAPL","statements":[{"statement":"PL",
                     "columns":["Report Date","Fiscal Period","Fiscal Year","Revenue","Net Income"],
                     "data":[["2024-03-28","Q2",2024,90753000000,23636000000]]}]}]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/companies/statements/compact")
            .match_query(Matcher::UrlEncoded("statements".into(), "BS".into()))
            .with_status(200)
            .with_body(
                r#"[{"ticker":"AAPL","statements":[{"statement":"BS",
                     "columns":["Report Date","Total Liabilities","Total Equity","Share Capital & Additional Paid-In Capital"],
                     "data":[["2024-03-28",263217000000,74194000000,78815000000]]}]}]"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/companies/common-shares-outstanding")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"endOfPeriod":"2024-03-28","value":15337686000}]"#)
            .create_async()
            .await;

        let client = SimFin::builder("key")
            .base_url(server.url())
            .request_interval(Duration::ZERO)
            .build()
            .unwrap();
        let window = Window {
            start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        };
        let datasets = client.fetch_all("AAPL", &window).await;
        assert!(datasets.is_complete(PeMethod::MarketCap));

        let rows = build_features(&datasets, PeMethod::MarketCap);
        assert_eq!(rows.len(), 3);
        let last = &rows[2];
        assert_eq!(last.net_income, Some(23_636_000_000.0));
        assert_eq!(last.share_capital, Some(78_815_000_000.0));
        let expected_pe = 168.84 * 15_337_686_000.0 / 23_636_000_000.0;
        assert!((last.p_e_ratio.unwrap() - expected_pe).abs() < 1e-9);
        let expected_sma = (171.48 + 170.03 + 168.84) / 3.0;
        assert!((last.sma_50.unwrap() - expected_sma).abs() < 1e-9);
        assert_eq!(rows[0].next_close, Some(170.03));
    }

    #[test]
    fn completeness() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut datasets = Datasets::default();
        assert!(!datasets.is_complete(PeMethod::MarketCap));
        assert!(!datasets.is_complete(PeMethod::ShareCapital));

        datasets.prices.push(PriceRecord {
            ticker: "AAPL".into(),
            date: day,
            close: Some(1.0),
        });
        datasets.income.push(IncomeRecord {
            ticker: "AAPL".into(),
            date: day,
            fiscal_period: None,
            fiscal_year: None,
            revenue: None,
            net_income: Some(1.0),
        });
        datasets.balance.push(BalanceSheetRecord {
            ticker: "AAPL".into(),
            date: day,
            total_liabilities: None,
            total_equity: None,
            share_capital: Some(1.0),
        });

        // no share counts: enough for the share-capital P/E only
        assert!(!datasets.is_complete(PeMethod::MarketCap));
        assert!(datasets.is_complete(PeMethod::ShareCapital));

        datasets.shares.push(SharesOutstandingRecord {
            ticker: "AAPL".into(),
            date: day,
            shares_outstanding: Some(1.0),
        });
        assert!(datasets.is_complete(PeMethod::MarketCap));
    }
}
