//! Configuration loading, validation and hashing

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, hash_str, load_config, load_config_with_hash};
pub use types::{
    BackendKind, Config, CrawlerConfig, FileExtensionFilters, FilterConfig, PersistenceConfig,
    StrategyKind, TechnicalFilters, UserAgentConfig,
};
pub use validation::validate;
