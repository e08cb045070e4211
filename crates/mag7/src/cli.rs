use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use mag7_warehouse::PeMethod;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing
    #[arg(long, global = true, default_value = "INFO", ignore_case = true)]
    pub trace: TraceLevel,

    /// Append logs to this file instead of printing them
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// SimFin API key; falls back to $SIMFIN_API_KEY
    #[arg(long, global = true)]
    pub api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, merge & score the latest trading day of each ticker.
    Predict {
        /// Tickers to score; defaults to the Magnificent 7.
        tickers: Vec<String>,

        /// Day to score (YYYY-MM-DD); defaults to the previous trading day.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// XGBoost JSON model; falls back to $MODEL_PATH.
        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = PeArg::MarketCap)]
        pe_method: PeArg,

        /// Score the latest available day when `date` has no data.
        #[arg(long)]
        fallback_latest: bool,

        /// Write the merged rows of every ticker to a `.csv` file.
        #[arg(long)]
        export: Option<PathBuf>,

        /// Number of trailing rows to print per ticker.
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },

    /// Fetch & merge a single ticker without scoring it.
    Fetch {
        ticker: String,

        /// First day of the window (YYYY-MM-DD); defaults to a year before `end`.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day of the window (YYYY-MM-DD); defaults to the previous trading day.
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long, value_enum, default_value_t = PeArg::MarketCap)]
        pe_method: PeArg,

        /// Write the merged rows to a `.csv` file.
        #[arg(long)]
        export: Option<PathBuf>,

        /// Number of trailing rows to print.
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },

    /// List the default ticker universe.
    Tickers,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeArg {
    /// close * shares outstanding / net income
    MarketCap,
    /// close / (net income / share capital)
    ShareCapital,
}

impl From<PeArg> for PeMethod {
    fn from(arg: PeArg) -> Self {
        match arg {
            PeArg::MarketCap => PeMethod::MarketCap,
            PeArg::ShareCapital => PeMethod::ShareCapital,
        }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceLevel {
    DEBUG,
    INFO,
    WARN,
    ERROR,
}
