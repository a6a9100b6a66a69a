pub mod api_server_axum;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod processor;
pub mod quotes;
pub mod settlement;
pub mod taifex_client;

// Re-exports for convenience
pub use error::ReportError;
pub use models::{
    ChipAnalysis, ChipStatus, ContractRole, ContractTarget, OptionReport, OptionRow, OptionSide,
    Quote, QuoteOverlay, StrikeRow,
};
pub use processor::{aggregate, ChipThresholds};
pub use settlement::SettlementResolver;
pub use taifex_client::TaifexClient;
