pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod portfolio;
pub mod pricing;
pub mod quotes;
pub mod resolve;
pub mod retry;
pub mod run;
pub mod summary;
pub mod tracker;
