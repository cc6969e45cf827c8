pub mod aggregate;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod value;

pub use aggregate::{approx_indices, fold_partials, Folded};
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Result, StatlineError};
pub use model::{ByType, MetricType, Partial, PartialBatch, Status, StatusEntry};
pub use parser::{parse_config_from_file, parse_config_from_str, ConfigFormat};
pub use value::{parse_value, validate_path, Value};
