//! wxcache library
//!
//! A cache-aside fetch engine with freshness expiry and offline fallback,
//! plus the OpenWeatherMap source, configuration and CLI parsing used by the
//! `wxcache` binary.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod data;
pub mod logging;
pub mod source;
