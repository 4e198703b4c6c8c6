//! Deterministic language handling: normalization, keyword sets, fuzzy
//! matching, the fallback classifier and entity extraction.

pub mod classifier;
pub mod entities;
pub mod fuzzy;
pub mod keywords;
pub mod normalize;

pub use classifier::{FALLBACK_CONFIDENCE_CAP, KeywordClassifier};
pub use entities::extract_entities;
pub use fuzzy::edit_distance;
pub use keywords::KeywordSets;
pub use normalize::Normalizer;
