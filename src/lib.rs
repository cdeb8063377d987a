pub mod audit;
pub mod auth;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod engine;
pub mod export;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
