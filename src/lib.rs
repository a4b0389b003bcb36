pub mod cli;
pub mod config;
pub mod csv_parser;
pub mod error;
pub mod events;
pub mod file_watcher;
pub mod ingest;
pub mod instance;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod startup;
pub mod status;
pub mod upload_queue;
pub mod validation;
