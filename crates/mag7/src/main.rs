use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands::*, TraceLevel};
use colored::Colorize;
use dotenv::dotenv;
use mag7_util::{single_pb, write_csv};
use mag7_warehouse::pipeline::{build_features, trading_window, window_ending, Window};
use mag7_warehouse::{Booster, MergedRow, MAG7};
use predict::{predict_ticker, Outcome};
use settings::Settings;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod predict;
mod report;
mod settings;

fn preprocess(trace_level: Level, log_file: Option<&Path>) -> Result<()> {
    dotenv().ok();
    let builder = FmtSubscriber::builder().with_max_level(trace_level);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            subscriber::set_global_default(
                builder.with_ansi(false).with_writer(Mutex::new(file)).finish(),
            )?;
        }
        None => subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.trace {
        TraceLevel::DEBUG => Level::DEBUG,
        TraceLevel::INFO => Level::INFO,
        TraceLevel::WARN => Level::WARN,
        TraceLevel::ERROR => Level::ERROR,
    };

    preprocess(log_level, cli.log_file.as_deref())?;
    trace!("Command line input recorded: {cli:#?}");

    let today = chrono::Local::now().date_naive();

    // cli framework:
    // "> mag7 <COMMAND>"
    match cli.command {
        // "> mag7 predict [TICKERS..] [--date] [--model] ..."
        // fetch, merge & score each ticker
        Predict {
            tickers,
            date,
            model,
            pe_method,
            fallback_latest,
            export,
            rows,
        } => {
            let settings = Settings::from_env()?.with_overrides(cli.api_key, model);
            let client = settings.simfin()?;

            // a missing or malformed model halts the run before any fetching
            let booster = Booster::load(&settings.model_path).await.map_err(|e| {
                error!("Error loading model: {e}");
                e
            })?;

            let window = match date {
                Some(date) => window_ending(date),
                None => trading_window(today),
            };
            let tickers = universe(tickers);
            info!(
                "Scoring {} tickers on {} (window {} -> {})",
                tickers.len(),
                window.end,
                window.start,
                window.end
            );

            let pb = single_pb(tickers.len() as u64);
            let mut exported: Vec<MergedRow> = vec![];
            for ticker in &tickers {
                pb.set_message(ticker.clone());

                let outcome = predict_ticker(
                    &client,
                    &booster,
                    ticker,
                    &window,
                    fallback_latest,
                    pe_method.into(),
                )
                .await
                .map_err(|e| {
                    error!("[{ticker}] prediction error: {e}");
                    e
                })?;

                pb.suspend(|| {
                    if let Outcome::NoData = outcome {
                        println!(
                            "{}",
                            format!(
                                "[{ticker}] No stock data available. \
                                 Please try another stock or check back later."
                            )
                            .red()
                        );
                        return;
                    }

                    println!("\n[{ticker}] latest {rows} closing days");
                    print!("{}", report::render_table(outcome.merged(), rows));
                    match &outcome {
                        Outcome::Scored {
                            row, prediction, ..
                        } => println!("{}", report::render_prediction(row, prediction)),
                        _ => println!("[{ticker}] No data available for {}.", window.end),
                    }
                });

                exported.extend(outcome.into_merged());
                pb.inc(1);
            }
            pb.finish_and_clear();

            if let Some(path) = export {
                write_csv(&path, &exported)?;
                println!("Merged dataset saved as '{}'", path.display());
            }
        }

        // "> mag7 fetch <TICKER> [--start] [--end] ..."
        // fetch & merge without scoring
        Fetch {
            ticker,
            start,
            end,
            pe_method,
            export,
            rows,
        } => {
            let settings = Settings::from_env()?.with_overrides(cli.api_key, None);
            let client = settings.simfin()?;

            let mut window = match end {
                Some(end) => window_ending(end),
                None => trading_window(today),
            };
            if let Some(start) = start {
                window = Window { start, ..window };
            }

            let datasets = client.fetch_all(&ticker, &window).await;
            println!(
                "[{ticker}] fetched {} prices, {} income statements, \
                 {} balance sheets, {} share counts",
                datasets.prices.len(),
                datasets.income.len(),
                datasets.balance.len(),
                datasets.shares.len(),
            );

            let merged = build_features(&datasets, pe_method.into());
            print!("{}", report::render_table(&merged, rows));

            if let Some(path) = export {
                write_csv(&path, &merged)?;
                println!("Merged dataset saved as '{}'", path.display());
            }
        }

        // "> mag7 tickers"
        Tickers => {
            for ticker in MAG7 {
                println!("{ticker}");
            }
        }
    }

    Ok(())
}

/// Requested tickers, upper-cased; the Mag 7 when none are given.
fn universe(tickers: Vec<String>) -> Vec<String> {
    if tickers.is_empty() {
        MAG7.iter().map(|t| t.to_string()).collect()
    } else {
        tickers.into_iter().map(|t| t.to_uppercase()).collect()
    }
}
