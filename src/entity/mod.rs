//! Entity layer modules.
//!
//! This module groups canonical entities and the raw mentions they are built from.

pub mod entity;
pub mod mention;

pub use entity::{CanonicalEntity, EntityId, EntityType};
pub use mention::{parse_mentions, CorrespondenceRole, Mention, RejectedRecord, MAX_TEXT_LEN};
