use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which side of the book a reported option row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    /// Normalize the report's free-text call/put column once at ingestion.
    ///
    /// The TAIFEX report labels the column in Chinese (`買權`/`賣權`), while
    /// mirrors and older archives use English. Anything that is typed but not
    /// recognizably a call is treated as a put; an empty cell is no side at
    /// all and the row is discarded by the caller.
    pub fn from_report_token(token: &str) -> Option<Self> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.to_lowercase().contains("call") || trimmed.contains("買") {
            Some(OptionSide::Call)
        } else {
            Some(OptionSide::Put)
        }
    }
}

/// One line of the daily options market report, already cleaned up:
/// numerics are comma-stripped and the side is a closed enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRow {
    /// Contract month token, e.g. `202503` (monthly) or `202503W1` (weekly).
    pub contract_month: String,

    pub strike: f64,

    pub side: OptionSide,

    pub open_interest: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// A parsed daily report: the as-of date actually found in the file plus
/// every TXO row it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionReport {
    #[serde(with = "slash_date")]
    pub as_of: NaiveDate,

    pub rows: Vec<OptionRow>,
}

/// Merged call/put open interest at one strike of one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    pub strike: f64,
    pub call_oi: f64,
    pub put_oi: f64,
    pub call_amount: f64,
    pub put_amount: f64,
}

/// Why a contract was selected for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    /// Nearest-dated surviving contract (usually a weekly).
    Nearest,
    /// Nearest surviving monthly contract.
    Monthly,
}

/// A contract selected for display, with its merged strike ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTarget {
    pub code: String,

    #[serde(with = "slash_date")]
    pub settlement: NaiveDate,

    pub role: ContractRole,

    pub rows: Vec<StrikeRow>,

    pub call_oi_total: f64,
    pub put_oi_total: f64,
    pub call_amount_total: f64,
    pub put_amount_total: f64,

    /// `100 × putOI / callOI`; 0 when the call side is empty.
    pub pc_ratio_oi: f64,
    /// Same ratio over notional amounts.
    pub pc_ratio_amount: f64,
}

/// Distinguishes a quiet market from a source outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipStatus {
    Ok,
    /// The report had no rows (or zero total OI).
    NoData,
    /// Rows existed but nothing survived filtering.
    NoContracts,
}

/// Full output of one aggregation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipAnalysis {
    pub status: ChipStatus,

    #[serde(with = "slash_date")]
    pub report_date: NaiveDate,

    pub targets: Vec<ContractTarget>,
}

/// A single real-time price point used as a chart overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,

    pub quote_time: String,

    /// Which upstream answered, e.g. "yahoo" or "twse-mis".
    pub source: String,
}

/// Spot + futures overlay pair; either side may be unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteOverlay {
    pub spot: Option<Quote>,
    pub futures: Option<Quote>,
}

/// Serde adapter for the `YYYY/MM/DD` format TAIFEX uses everywhere.
pub mod slash_date {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y/%m/%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
