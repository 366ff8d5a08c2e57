//! URL handling: admission filtering, dedup normalization, domain helpers

mod domain;
mod filter;
mod matcher;
mod normalize;

pub use domain::{extract_domain, origin_of};
pub use filter::{UrlFilter, Verdict};
pub use matcher::{domain_covers, in_domain_list};
pub use normalize::{dedup_key, normalize_url};
