pub mod config;
pub mod error;
pub mod record;
pub mod time;
pub mod types;

pub use config::{AppConfig, FileConfig};
pub use error::RakshaNetError;
pub use record::Record;
pub use time::{normalize_timestamp, parse_timestamp};
pub use types::*;
