use anyhow::{Context, Result};
use chrono::NaiveDate;
use rand::{seq::SliceRandom, thread_rng};
use reqwest::{header, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use crate::config;
use crate::error::ReportError;
use crate::models::{OptionRow, OptionReport, OptionSide};
use crate::settlement::{format_date, DATE_FMT};

// -----------------------------------------------
// CLIENT WRAPPER WITH SESSION STATE
// -----------------------------------------------
pub struct TaifexClient {
    client: Client,
    warmed_up: Arc<RwLock<bool>>,
}

impl TaifexClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            warmed_up: Arc::new(RwLock::new(false)),
        })
    }

    /// Warmup TAIFEX session (only once per client); the report download
    /// form wants the session cookie the landing page sets.
    async fn warmup_if_needed(&self) -> Result<(), ReportError> {
        if *self.warmed_up.read().await {
            return Ok(());
        }

        let mut warmed = self.warmed_up.write().await;
        if !*warmed {
            self.client
                .get(config::TAIFEX_BASE_URL)
                .header("Accept", config::HEADER_ACCEPT_HTML)
                .send()
                .await
                .map_err(|e| ReportError::Request(format!("warmup failed: {}", e)))?;

            tokio::time::sleep(Duration::from_millis(config::WARMUP_DELAY_MS)).await;
            *warmed = true;
        }

        Ok(())
    }

    /// Download the raw daily market report CSV for one date, with retry.
    async fn fetch_report_csv(&self, date: NaiveDate) -> Result<String, ReportError> {
        self.warmup_if_needed().await?;

        let query_date = format_date(date);
        let backoff = ExponentialBackoff::from_millis(config::RETRY_BASE_DELAY_MS)
            .factor(config::RETRY_FACTOR)
            .max_delay(Duration::from_secs(config::RETRY_MAX_DELAY_SECS))
            .take(config::RETRY_MAX_ATTEMPTS);

        Retry::spawn(backoff, || async {
            let res = self
                .client
                .post(config::TAIFEX_OPTION_REPORT_URL)
                .header("Referer", config::HEADER_REFERER)
                .header("X-Requested-With", config::HEADER_X_REQUESTED_WITH)
                .form(&[
                    ("queryType", "2"),
                    ("marketCode", "0"),
                    ("commodity_id", config::TXO_COMMODITY_ID),
                    ("queryDate", query_date.as_str()),
                    ("MarketCode", "0"),
                    ("commodity_idt", config::TXO_COMMODITY_ID),
                    ("down_type", "1"),
                ])
                .send()
                .await
                .map_err(|e| ReportError::Request(format!("request send failed: {}", e)))?;

            let status = res.status();
            if !status.is_success() {
                return Err(ReportError::Request(format!("HTTP {}", status)));
            }

            let text = res
                .text()
                .await
                .map_err(|e| ReportError::Request(format!("failed to read body: {}", e)))?;

            // The form answers with an HTML page instead of the CSV when the
            // session is stale or the query was rejected.
            let trimmed = text.trim_start();
            if trimmed.starts_with('<') {
                let preview: String = trimmed.chars().take(200).collect();
                return Err(ReportError::NonCsvResponse(preview));
            }

            Ok(text)
        })
        .await
    }

    /// Fetch and parse the TXO daily market report for one date.
    ///
    /// A published-but-empty report (weekend placeholder, zero OI across
    /// every row) comes back as `ReportError::NotFound` so callers can walk
    /// back a day.
    pub async fn fetch_option_report(
        &self,
        date: NaiveDate,
    ) -> Result<OptionReport, ReportError> {
        let csv_text = self.fetch_report_csv(date).await?;
        let report = parse_report(&csv_text, date)?;
        tracing::info!(
            date = %format_date(report.as_of),
            rows = report.rows.len(),
            "fetched option report"
        );
        Ok(report)
    }

    /// Walk back from `end_date` until a published report turns up, bounded
    /// by `max_lookback` extra days. Only missing-data days are skipped;
    /// transport and parse failures propagate immediately.
    pub async fn fetch_latest_report(
        &self,
        end_date: NaiveDate,
        max_lookback: u32,
    ) -> Result<OptionReport, ReportError> {
        let mut last_missing = ReportError::NotFound(format_date(end_date));

        for offset in 0..=i64::from(max_lookback) {
            let date = end_date - chrono::Duration::days(offset);
            match self.fetch_option_report(date).await {
                Ok(report) => return Ok(report),
                Err(ReportError::NotFound(missing)) => {
                    tracing::warn!(date = %missing, "no report for date, trying previous day");
                    last_missing = ReportError::NotFound(missing);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_missing)
    }
}

// -----------------------------------------------
// CSV PARSING
// -----------------------------------------------

/// Candidate header fragments per column; the report alternates between
/// Chinese and English headings depending on which mirror served it.
const MONTH_KEYS: &[&str] = &["到期月份", "契約月份", "contract month"];
const STRIKE_KEYS: &[&str] = &["履約價", "strike"];
const SIDE_KEYS: &[&str] = &["買賣權", "call/put", "c/p"];
const OI_KEYS: &[&str] = &["未沖銷", "open interest"];
const PRICE_KEYS: &[&str] = &["結算價", "settlement price"];
const VOLUME_KEYS: &[&str] = &["成交量", "volume"];
const DATE_KEYS: &[&str] = &["交易日期", "date"];
const PRODUCT_KEYS: &[&str] = &["契約", "contract"];

/// Parse the daily market report CSV into TXO option rows.
///
/// Pure function: column positions are resolved by header keywords, numeric
/// cells are comma-stripped, and any cell that refuses to parse drops its
/// row rather than failing the report.
pub fn parse_report(csv_text: &str, query_date: NaiveDate) -> Result<OptionReport, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ReportError::Parse(format!("missing header row: {}", e)))?
        .clone();

    let month_col = find_column(&headers, MONTH_KEYS);
    let strike_col = find_column(&headers, STRIKE_KEYS);
    let side_col = find_column(&headers, SIDE_KEYS);
    let oi_col = find_column(&headers, OI_KEYS);
    let (Some(month_col), Some(strike_col), Some(side_col), Some(oi_col)) =
        (month_col, strike_col, side_col, oi_col)
    else {
        return Err(ReportError::Parse(format!(
            "unrecognized report layout: {:?}",
            headers.iter().collect::<Vec<_>>()
        )));
    };

    let price_col = find_column(&headers, PRICE_KEYS);
    let volume_col = find_column(&headers, VOLUME_KEYS);
    let date_col = find_column(&headers, DATE_KEYS);
    // The month column header usually contains the product keyword too, so
    // only treat a distinct column as the product id.
    let product_col = find_column(&headers, PRODUCT_KEYS).filter(|c| *c != month_col);

    let mut as_of = None;
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(err = %e, "skipping unreadable report line");
                continue;
            }
        };

        // The report file mixes products; keep TXO only.
        if let Some(col) = product_col {
            let product = record.get(col).unwrap_or("").trim();
            if !product.is_empty() && !product.contains(config::TXO_COMMODITY_ID) {
                continue;
            }
        }

        let Some(side) = OptionSide::from_report_token(record.get(side_col).unwrap_or(""))
        else {
            continue;
        };

        let Some(strike) = parse_number(record.get(strike_col).unwrap_or("")) else {
            continue;
        };
        if strike <= 0.0 {
            continue;
        }

        let Some(open_interest) = parse_number(record.get(oi_col).unwrap_or("")) else {
            continue;
        };
        if open_interest < 0.0 {
            continue;
        }

        let contract_month = record.get(month_col).unwrap_or("").trim().to_uppercase();
        if contract_month.is_empty() {
            continue;
        }

        if as_of.is_none() {
            as_of = date_col
                .and_then(|col| record.get(col))
                .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), DATE_FMT).ok());
        }

        rows.push(OptionRow {
            contract_month,
            strike,
            side,
            open_interest,
            settlement_price: price_col
                .and_then(|col| record.get(col))
                .and_then(parse_number)
                .filter(|p| *p > 0.0),
            volume: volume_col.and_then(|col| record.get(col)).and_then(parse_number),
        });
    }

    let total_oi: f64 = rows.iter().map(|r| r.open_interest).sum();
    if rows.is_empty() || total_oi <= 0.0 {
        return Err(ReportError::NotFound(format_date(query_date)));
    }

    Ok(OptionReport {
        as_of: as_of.unwrap_or(query_date),
        rows,
    })
}

/// First header whose text contains one of the candidate fragments.
fn find_column(headers: &csv::StringRecord, keys: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().to_lowercase();
        keys.iter().any(|k| h.contains(&k.to_lowercase()))
    })
}

/// Clean up a reported numeric cell: comma separators stripped, `-` and
/// blanks are missing values.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse().ok().filter(|v: &f64| v.is_finite())
}

// -----------------------------------------------
// HTTP CLIENT BUILDER
// -----------------------------------------------
fn build_client() -> Result<Client> {
    let mut headers = header::HeaderMap::new();

    // Rotating Accept-Language headers (fingerprint avoidance)
    let lang = config::ACCEPT_LANGUAGES
        .choose(&mut thread_rng())
        .context("no accept-language candidates")?;
    headers.insert(header::ACCEPT_LANGUAGE, header::HeaderValue::from_str(lang)?);
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));

    Ok(Client::builder()
        .default_headers(headers)
        .cookie_store(true) // the download form checks the session cookie
        .user_agent(config::USER_AGENT)
        .timeout(config::HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ZH: &str = "\
交易日期,契約,到期月份(週別),履約價,買賣權,成交量,結算價,未沖銷契約數
2025/03/10,TXO,202503,21000,買權,\"1,200\",315,\"12,345\"
2025/03/10,TXO,202503,21000,賣權,980,250,\"8,410\"
2025/03/10,TXO,202503W2,20800,買權,500,120,4500
2025/03/10,TXO,202503W2,20800,賣權,-,-,-
2025/03/10,TGO,202503,900,買權,10,5,999
";

    const SAMPLE_EN: &str = "\
Date,Contract,Contract Month(Week),Strike Price,Call/Put,Volume,Settlement Price,Open Interest
2025/03/10,TXO,202503,21000,Call,1200,315,12345
2025/03/10,TXO,202503,21000,Put,980,250,8410
";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_chinese_headers() {
        let report = parse_report(SAMPLE_ZH, date(2025, 3, 10)).unwrap();
        assert_eq!(report.as_of, date(2025, 3, 10));
        // Dash-valued OI row and the TGO product row are dropped
        assert_eq!(report.rows.len(), 3);

        let first = &report.rows[0];
        assert_eq!(first.contract_month, "202503");
        assert_eq!(first.side, OptionSide::Call);
        assert_eq!(first.strike, 21000.0);
        assert_eq!(first.open_interest, 12345.0);
        assert_eq!(first.settlement_price, Some(315.0));
        assert_eq!(first.volume, Some(1200.0));
    }

    #[test]
    fn test_parse_english_headers() {
        let report = parse_report(SAMPLE_EN, date(2025, 3, 10)).unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[1].side, OptionSide::Put);
        assert_eq!(report.rows[1].open_interest, 8410.0);
    }

    #[test]
    fn test_empty_report_is_not_found() {
        let header_only =
            "交易日期,契約,到期月份(週別),履約價,買賣權,成交量,結算價,未沖銷契約數\n";
        match parse_report(header_only, date(2025, 3, 9)) {
            Err(ReportError::NotFound(d)) => assert_eq!(d, "2025/03/09"),
            other => panic!("expected NotFound, got {:?}", other.map(|r| r.rows.len())),
        }
    }

    #[test]
    fn test_zero_oi_report_is_not_found() {
        let csv = "\
交易日期,契約,到期月份(週別),履約價,買賣權,成交量,結算價,未沖銷契約數
2025/03/09,TXO,202503,21000,買權,0,0,0
";
        assert!(matches!(
            parse_report(csv, date(2025, 3, 9)),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_unrecognized_layout_is_parse_error() {
        let csv = "a,b,c\n1,2,3\n";
        assert!(matches!(
            parse_report(csv, date(2025, 3, 10)),
            Err(ReportError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_number_cleanup() {
        assert_eq!(parse_number(" 12,345 "), Some(12345.0));
        assert_eq!(parse_number("315.5"), Some(315.5));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
    }
}
