use anyhow::Result;
use colored::Colorize;

use txo_analyzer::api_server_axum;
use txo_analyzer::config;
use txo_analyzer::error::ReportError;
use txo_analyzer::logging;
use txo_analyzer::models::{ChipStatus, ContractRole, ContractTarget, Quote, QuoteOverlay};
use txo_analyzer::processor::{self, ChipThresholds};
use txo_analyzer::quotes::{taipei_today, QuoteClient};
use txo_analyzer::settlement::{format_date, SettlementResolver};
use txo_analyzer::taifex_client::TaifexClient;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    match config::get_execution_mode().as_str() {
        "serve" => api_server_axum::start_server(config::get_port()).await,
        _ => run_batch().await,
    }
}

/// One fetch → aggregate → render cycle on the terminal.
async fn run_batch() -> Result<()> {
    println!("{}", "=".repeat(60).blue());
    println!("{}", "TXO Chip Analyzer".green().bold());
    println!("{}", "=".repeat(60).blue());
    println!();

    let client = TaifexClient::new()?;
    let quote_client = QuoteClient::new()?;
    let resolver = SettlementResolver::from_env();

    // Step 1: fetch the most recent published report
    println!("{}", "Step 1: Fetching daily option report...".cyan());
    let lookback = config::get_max_lookback_days();
    let start_time = std::time::Instant::now();

    let report = match client.fetch_latest_report(taipei_today(), lookback).await {
        Ok(report) => report,
        Err(ReportError::NotFound(date)) => {
            println!(
                "{} No report published within the last {} days (last tried {})",
                "✗".red(),
                lookback,
                date.yellow()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "{} Report {} with {} rows ({:.2}s)",
        "✓".green(),
        format_date(report.as_of).yellow(),
        report.rows.len(),
        start_time.elapsed().as_secs_f64()
    );
    println!();

    // Step 2: aggregate chips and select contracts
    println!("{}", "Step 2: Aggregating open interest...".cyan());
    let analysis = processor::aggregate(
        &report.rows,
        report.as_of,
        &resolver,
        &ChipThresholds::from_env(),
    );

    match analysis.status {
        ChipStatus::NoData => {
            println!("{} Report carried no usable rows", "✗".red());
            return Ok(());
        }
        ChipStatus::NoContracts => {
            println!(
                "{} No contract cleared the OI thresholds (quiet market?)",
                "✗".yellow()
            );
            return Ok(());
        }
        ChipStatus::Ok => {
            println!(
                "{} Selected {} contract(s) for display",
                "✓".green(),
                analysis.targets.len()
            );
        }
    }
    println!();

    // Step 3: live price overlay (best effort)
    println!("{}", "Step 3: Fetching price overlay...".cyan());
    let overlay = quote_client.fetch_overlay().await;
    print_quote_line("Spot  (TAIEX)", overlay.spot.as_ref());
    print_quote_line("Futures (TX)", overlay.futures.as_ref());
    println!();

    // Step 4: render each selected contract
    for target in &analysis.targets {
        render_target(target, &overlay);
        println!();
    }

    // Step 5: save to JSON for the dashboard frontend
    println!("{}", "Saving results to output.json...".cyan());
    let output = serde_json::json!({
        "analysis": analysis,
        "quotes": overlay,
    });
    std::fs::write("output.json", serde_json::to_string_pretty(&output)?)?;
    println!("{} Saved output.json", "✓".green());

    println!();
    println!("{}", "=".repeat(60).blue());
    println!("{}", "Done!".green().bold());
    println!("{}", "=".repeat(60).blue());

    Ok(())
}

fn print_quote_line(label: &str, quote: Option<&Quote>) {
    match quote {
        Some(q) => {
            let change = q
                .change
                .map(|c| format!("{:+.2}", c))
                .unwrap_or_else(|| "n/a".to_string());
            let pct = q
                .change_percent
                .map(|p| format!("{:+.2}%", p))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "{} {:<14} {:>10.2}  {} ({})  [{} @ {}]",
                "✓".green(),
                label,
                q.price,
                change,
                pct,
                q.source,
                q.quote_time
            );
        }
        None => println!("{} {:<14} unavailable", "✗".yellow(), label),
    }
}

const BAR_WIDTH: usize = 36;

/// Terminal support/resistance chart: calls left (resistance), puts right
/// (support), spot marker on the closest strike.
fn render_target(target: &ContractTarget, overlay: &QuoteOverlay) {
    let role = match target.role {
        ContractRole::Nearest => "nearest",
        ContractRole::Monthly => "monthly",
    };

    println!("{}", "-".repeat(60).blue());
    println!(
        "{} {} ({})  settles {}",
        "▸".cyan(),
        target.code.yellow().bold(),
        role,
        format_date(target.settlement).yellow()
    );
    println!(
        "  Call OI {}  Put OI {}  P/C {:.1}% (OI) / {:.1}% (amount)",
        target.call_oi_total,
        target.put_oi_total,
        target.pc_ratio_oi,
        target.pc_ratio_amount
    );
    println!();

    let max_oi = target
        .rows
        .iter()
        .map(|r| r.call_oi.max(r.put_oi))
        .fold(1.0, f64::max);

    let spot_strike = overlay.spot.as_ref().map(|q| {
        target
            .rows
            .iter()
            .map(|r| r.strike)
            .min_by(|a, b| {
                (a - q.price)
                    .abs()
                    .partial_cmp(&(b - q.price).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0.0)
    });

    println!(
        "  {:>7} {:>width$}   {:<width$}",
        "Strike",
        "Call OI",
        "Put OI",
        width = BAR_WIDTH
    );
    for row in &target.rows {
        let call_bar = format!("{:>width$}", bar(row.call_oi, max_oi), width = BAR_WIDTH);
        let put_bar = format!("{:<width$}", bar(row.put_oi, max_oi), width = BAR_WIDTH);
        let marker = match (spot_strike, overlay.spot.as_ref()) {
            (Some(strike), Some(quote)) if strike == row.strike => {
                format!(" ◀ spot {:.2}", quote.price)
            }
            _ => String::new(),
        };
        println!(
            "  {:>7} {} | {}{}",
            row.strike,
            call_bar.red(),
            put_bar.green(),
            marker.cyan()
        );
    }
}

fn bar(value: f64, max: f64) -> String {
    let len = ((value / max) * BAR_WIDTH as f64).round() as usize;
    "█".repeat(len.min(BAR_WIDTH))
}
