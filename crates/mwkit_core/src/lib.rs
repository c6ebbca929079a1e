pub mod api_error;
pub mod category;
pub mod client;
pub mod config;
pub mod report;
pub mod session;
pub mod site;
pub mod template;
pub mod transform;
pub mod wikitext;

pub use api_error::{ApiErrorDetails, FailureKind, classify};
pub use report::{ChangeSummary, UniqueSubstitution};
pub use site::{Site, SiteRegistry, SortKeyPolicy, TitlePatternResolver};
pub use wikitext::{Captured, Substitution, Wikitext, WikitextError};
