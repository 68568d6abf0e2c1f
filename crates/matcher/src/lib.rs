//! # skinmatch matcher
//!
//! Resolves free-text item names ("ak47 redline ft", "AK 红线 久经") to the
//! canonical catalog name by embedding similarity.
//!
//! ```no_run
//! use skinmatch_matcher::{NameResolver, ResolverConfig, DEFAULT_SCORE_CUTOFF};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = NameResolver::from_config(ResolverConfig::load(None)?);
//!     match resolver.find_best_match("ak47 redline ft", DEFAULT_SCORE_CUTOFF)? {
//!         Some(name) => println!("{name}"),
//!         None => println!("could not identify an item for this query"),
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod outcome;
mod resolver;
mod variants;

pub use config::{
    parse_value, IndexConfig, ResolverConfig, CONFIG_FILE_NAME, DEFAULT_SCORE_CUTOFF,
    DEFAULT_TOP_K,
};
pub use error::{ConfigError, ResolverError, Result};
pub use outcome::{MatchOutcome, MatchResult, Resolution};
pub use resolver::{EncoderLoader, NameResolver, NameResolverBuilder, WarmReport};
pub use variants::query_variants;

/// Message shown when a query resolves to nothing.
pub const NO_MATCH_MESSAGE: &str = "could not identify an item for this query";
