use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config;
use crate::models::{Quote, QuoteOverlay};

/// Real-time TAIEX spot / TX futures quotes with a primary + fallback chain.
///
/// Quotes are overlay values only: every failure is logged and degrades to
/// `None`, nothing here ever aborts the aggregation pipeline.
pub struct QuoteClient {
    client: Client,
}

impl QuoteClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::USER_AGENT)
            .timeout(config::QUOTE_TIMEOUT)
            .build()
            .context("Failed to build quote HTTP client")?;
        Ok(Self { client })
    }

    /// TAIEX spot: Yahoo first, TWSE MIS as fallback.
    pub async fn fetch_spot(&self) -> Option<Quote> {
        match self.fetch_spot_yahoo().await {
            Ok(quote) => return Some(quote),
            Err(e) => tracing::warn!(err = %e, "yahoo spot quote failed, trying TWSE MIS"),
        }
        match self.fetch_spot_twse().await {
            Ok(quote) => Some(quote),
            Err(e) => {
                tracing::warn!(err = %e, "TWSE MIS spot quote failed");
                None
            }
        }
    }

    /// TX futures from the TAIFEX MIS quote list.
    pub async fn fetch_futures(&self) -> Option<Quote> {
        match self.fetch_futures_taifex().await {
            Ok(quote) => Some(quote),
            Err(e) => {
                tracing::warn!(err = %e, "TAIFEX MIS futures quote failed");
                None
            }
        }
    }

    /// Both overlays at once.
    pub async fn fetch_overlay(&self) -> QuoteOverlay {
        let (spot, futures) = tokio::join!(self.fetch_spot(), self.fetch_futures());
        QuoteOverlay { spot, futures }
    }

    async fn fetch_spot_yahoo(&self) -> Result<Quote> {
        let ts = Utc::now().timestamp();
        let url = config::yahoo_chart_url(config::YAHOO_TAIEX_SYMBOL, ts);
        let value: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_yahoo_chart(&value)
    }

    async fn fetch_spot_twse(&self) -> Result<Quote> {
        let value: Value = self
            .client
            .get(config::TWSE_MIS_TAIEX_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_twse_mis(&value)
    }

    async fn fetch_futures_taifex(&self) -> Result<Quote> {
        let body = json!({
            "MarketType": "0",
            "SymbolType": "F",
            "KindID": "1",
            "CID": config::TXF_SYMBOL_ID,
            "ExpireMonth": "",
            "RowSize": "全部筆數",
            "PageNo": "",
            "SortColumn": "",
            "AscDesc": "A",
        });
        let value: Value = self
            .client
            .post(config::TAIFEX_MIS_QUOTE_URL)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_taifex_mis(&value)
    }
}

// -----------------------------------------------
// RESPONSE PARSING
// -----------------------------------------------

fn parse_yahoo_chart(value: &Value) -> Result<Quote> {
    let meta = value
        .pointer("/chart/result/0/meta")
        .context("missing chart meta")?;
    let price = meta
        .get("regularMarketPrice")
        .and_then(Value::as_f64)
        .context("missing regularMarketPrice")?;
    let prev = meta.get("chartPreviousClose").and_then(Value::as_f64);

    let quote_time = meta
        .get("regularMarketTime")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.with_timezone(&taipei_tz()).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(taipei_now_string);

    Ok(Quote {
        price,
        change: prev.map(|p| price - p),
        change_percent: prev.filter(|p| *p != 0.0).map(|p| (price - p) / p * 100.0),
        quote_time,
        source: "yahoo".to_string(),
    })
}

fn parse_twse_mis(value: &Value) -> Result<Quote> {
    let entry = value
        .pointer("/msgArray/0")
        .context("empty msgArray")?;
    // "z" is the last trade; during the pre-open it reads "-"
    let price = string_field(entry, "z")
        .or_else(|| string_field(entry, "y"))
        .context("no usable price field")?;
    let prev_close = string_field(entry, "y");

    Ok(Quote {
        price,
        change: prev_close.map(|y| price - y),
        change_percent: prev_close
            .filter(|y| *y != 0.0)
            .map(|y| (price - y) / y * 100.0),
        quote_time: taipei_now_string(),
        source: "twse-mis".to_string(),
    })
}

fn parse_taifex_mis(value: &Value) -> Result<Quote> {
    let quotes = value
        .pointer("/RtData/QuoteList")
        .and_then(Value::as_array)
        .context("missing QuoteList")?;
    let entry = quotes
        .iter()
        .find(|q| string_field(q, "CLastPrice").is_some())
        .context("no tradable futures quote")?;

    let price = string_field(entry, "CLastPrice").context("missing CLastPrice")?;
    let reference = string_field(entry, "CRefPrice");

    Ok(Quote {
        price,
        change: reference.map(|r| price - r),
        change_percent: reference
            .filter(|r| *r != 0.0)
            .map(|r| (price - r) / r * 100.0),
        quote_time: taipei_now_string(),
        source: "taifex-mis".to_string(),
    })
}

/// MIS endpoints encode every number as a string; `-` means no trade yet.
fn string_field(entry: &Value, key: &str) -> Option<f64> {
    let raw = entry.get(key)?.as_str()?.trim().replace(',', "");
    if raw.is_empty() || raw == "-" {
        return None;
    }
    raw.parse().ok()
}

// -----------------------------------------------
// MARKET CLOCK
// -----------------------------------------------

pub fn taipei_tz() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

pub fn taipei_today() -> NaiveDate {
    Utc::now().with_timezone(&taipei_tz()).date_naive()
}

fn taipei_now_string() -> String {
    Utc::now()
        .with_timezone(&taipei_tz())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yahoo_chart() {
        let value = json!({
            "chart": { "result": [ { "meta": {
                "regularMarketPrice": 22150.5,
                "chartPreviousClose": 22000.0,
                "regularMarketTime": 1741586400i64,
            }}]}
        });
        let quote = parse_yahoo_chart(&value).unwrap();
        assert_eq!(quote.price, 22150.5);
        assert_eq!(quote.change, Some(150.5));
        assert!((quote.change_percent.unwrap() - 150.5 / 22000.0 * 100.0).abs() < 1e-9);
        assert_eq!(quote.source, "yahoo");
    }

    #[test]
    fn test_parse_yahoo_chart_missing_price() {
        let value = json!({ "chart": { "result": [ { "meta": {} } ] } });
        assert!(parse_yahoo_chart(&value).is_err());
    }

    #[test]
    fn test_parse_twse_mis_dash_price_falls_back() {
        let value = json!({
            "msgArray": [ { "z": "-", "y": "21900.00" } ]
        });
        let quote = parse_twse_mis(&value).unwrap();
        assert_eq!(quote.price, 21900.0);
        assert_eq!(quote.source, "twse-mis");
    }

    #[test]
    fn test_parse_taifex_mis_skips_untraded_rows() {
        let value = json!({
            "RtData": { "QuoteList": [
                { "CLastPrice": "-", "CRefPrice": "21900" },
                { "CLastPrice": "21,955", "CRefPrice": "21900" },
            ]}
        });
        let quote = parse_taifex_mis(&value).unwrap();
        assert_eq!(quote.price, 21955.0);
        assert_eq!(quote.change, Some(55.0));
    }
}
