use std::time::Duration;

// -----------------------------------------------
// TAIFEX ENDPOINTS
// -----------------------------------------------
pub const TAIFEX_BASE_URL: &str = "https://www.taifex.com.tw";
pub const TAIFEX_OPTION_REPORT_URL: &str =
    "https://www.taifex.com.tw/cht/3/optDailyMarketReport";
pub const TAIFEX_MIS_QUOTE_URL: &str =
    "https://mis.taifex.com.tw/futures/api/getQuoteList";

/// TAIEX options product id on the daily market report form
pub const TXO_COMMODITY_ID: &str = "TXO";
/// TAIEX futures symbol prefix on the MIS quote API
pub const TXF_SYMBOL_ID: &str = "TXF";

// -----------------------------------------------
// REAL-TIME QUOTE ENDPOINTS
// -----------------------------------------------
pub const YAHOO_TAIEX_SYMBOL: &str = "^TWII";

/// Yahoo v8 chart endpoint; the trailing `_` timestamp defeats CDN caching
/// so consecutive polls see fresh prices.
pub fn yahoo_chart_url(symbol: &str, ts: i64) -> String {
    format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?interval=1d&_={}",
        urlencoding::encode(symbol),
        ts
    )
}

pub const TWSE_MIS_TAIEX_URL: &str =
    "https://mis.twse.com.tw/stock/api/getStockInfo.jsp?ex_ch=tse_t00.tw&json=1&delay=0";

// -----------------------------------------------
// HTTP CLIENT CONFIG
// -----------------------------------------------
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                               AppleWebKit/537.36 (KHTML, like Gecko) \
                               Chrome/131.0.0.0 Safari/537.36";

pub const ACCEPT_LANGUAGES: &[&str] = &[
    "zh-TW,zh;q=0.9,en;q=0.8",
    "zh-TW,zh;q=0.8",
    "en-US,en;q=0.9",
];

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Short timeout for the real-time quote endpoints; quotes are overlay
/// values and a stale answer is worthless.
pub const QUOTE_TIMEOUT: Duration = Duration::from_secs(3);

// -----------------------------------------------
// SESSION WARMUP
// -----------------------------------------------
pub const WARMUP_DELAY_MS: u64 = 200;

// -----------------------------------------------
// RETRY CONFIG
// -----------------------------------------------
pub const RETRY_BASE_DELAY_MS: u64 = 200;
pub const RETRY_FACTOR: u64 = 3;
pub const RETRY_MAX_DELAY_SECS: u64 = 5;
pub const RETRY_MAX_ATTEMPTS: usize = 5;

// -----------------------------------------------
// REPORT LOOKBACK
// -----------------------------------------------
/// The daily report is published per trading day; weekends and holidays
/// have no file, so the fetcher walks back up to this many calendar days.
pub const DEFAULT_MAX_LOOKBACK_DAYS: u32 = 5;

// -----------------------------------------------
// CACHE DURATIONS
// -----------------------------------------------
pub const REPORT_CACHE_DURATION: Duration = Duration::from_secs(300);
pub const QUOTE_CACHE_DURATION: Duration = Duration::from_secs(30);

// -----------------------------------------------
// CONTRACT / AGGREGATION PARAMETERS
// -----------------------------------------------
/// NTD value of one index point per TXO contract.
pub const CONTRACT_MULTIPLIER: f64 = 50.0;

/// A strike is displayable when either side's OI clears this floor.
pub const DEFAULT_STRIKE_MIN_OI: f64 = 300.0;

/// A contract is displayable when its best strike clears this floor.
pub const DEFAULT_CONTRACT_MIN_MAX_OI: f64 = 500.0;

// -----------------------------------------------
// HTTP HEADERS
// -----------------------------------------------
pub const HEADER_REFERER: &str = "https://www.taifex.com.tw/";
pub const HEADER_X_REQUESTED_WITH: &str = "XMLHttpRequest";
pub const HEADER_ACCEPT_HTML: &str = "text/html";

// -----------------------------------------------
// RUNTIME CONFIGURATION
// -----------------------------------------------

/// Get the execution mode from environment or default to batch
pub fn get_execution_mode() -> String {
    std::env::var("TXO_MODE").unwrap_or_else(|_| "batch".to_string())
}

/// API server port
pub fn get_port() -> u16 {
    std::env::var("TXO_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

/// Per-strike OI significance floor (overridable for quiet markets)
pub fn get_strike_min_oi() -> f64 {
    env_f64("TXO_STRIKE_MIN_OI", DEFAULT_STRIKE_MIN_OI)
}

/// Group-level max-OI guard
pub fn get_contract_min_max_oi() -> f64 {
    env_f64("TXO_CONTRACT_MIN_MAX_OI", DEFAULT_CONTRACT_MIN_MAX_OI)
}

/// How many calendar days to walk back looking for a published report
pub fn get_max_lookback_days() -> u32 {
    std::env::var("TXO_MAX_LOOKBACK_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(|n: u32| n.min(31))
        .unwrap_or(DEFAULT_MAX_LOOKBACK_DAYS)
}

/// Optional path to a JSON settlement-override table
pub fn get_overrides_path() -> Option<String> {
    std::env::var("TXO_OVERRIDES_PATH").ok()
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite() && *v >= 0.0)
        .unwrap_or(default)
}
