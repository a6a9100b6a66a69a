use std::fmt;

#[derive(Debug)]
pub enum ReportError {
    Request(String),
    NonCsvResponse(String),
    Parse(String),
    /// No report published for the requested date (weekend, holiday, or
    /// an all-zero-OI placeholder file).
    NotFound(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::Request(msg) => write!(f, "Request error: {}", msg),
            ReportError::NonCsvResponse(preview) => write!(f, "Non-CSV response: {}", preview),
            ReportError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ReportError::NotFound(date) => write!(f, "No report data for {}", date),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        ReportError::Request(err.to_string())
    }
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        ReportError::Parse(err.to_string())
    }
}
