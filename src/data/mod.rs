//! Remote data sources
//!
//! Currently only the OpenWeatherMap binding lives here.

pub mod weather;

pub use weather::{
    suggestion_names, OpenWeatherSource, Report, Units, WeatherError, WeatherQuery,
};
