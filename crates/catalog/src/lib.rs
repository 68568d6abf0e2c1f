//! # skinmatch catalog
//!
//! The name data the resolver works over:
//!
//! - [`CatalogStore`]: ordered item names from `skin_list.txt`, one per line
//! - [`AliasMap`]: alias → canonical names from `skin_name_mapping.json`
//! - [`WearCondition`]: the wear-condition vocabulary
//! - [`CatalogRefresher`]: rebuilds both artifacts from per-locale item feeds
//!
//! Loading never fails the caller: a missing catalog becomes an empty store
//! and a missing or broken mapping becomes the identity mapping.

mod alias;
mod error;
mod refresh;
mod store;
mod wear;

pub use alias::{AliasMap, ALIAS_SECTION_KEY};
pub use error::{AliasError, CatalogError, RefreshError, Result};
pub use refresh::{CatalogRefresher, FeedSource, RefreshSummary, NAME_FIELDS};
pub use store::CatalogStore;
pub use wear::WearCondition;
