pub mod config;
pub mod cosign;
pub mod ledger_exec;
pub mod routes;
pub mod state;
pub mod worker;
