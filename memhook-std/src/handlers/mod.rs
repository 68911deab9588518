//! Standard handler implementations.

pub mod filter;
pub mod logging;

pub use filter::RangeFilter;
pub use logging::LoggingHandler;
