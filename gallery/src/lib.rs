//! Enrolled identity gallery for face-based attendance.
//!
//! The gallery owns every enrolled person's reference embeddings and answers
//! nearest-match queries with cosine distance.
//!
//! # Usage
//!
//! ```
//! use rollcall_gallery::{Gallery, GalleryConfig};
//!
//! let gallery = Gallery::new(GalleryConfig::new(3)).unwrap();
//! gallery.enroll("s-001", "Asha", &[vec![1.0, 0.0, 0.0]]).unwrap();
//!
//! let ranked = gallery.query_raw(&[0.9, 0.1, 0.0]).unwrap();
//! assert_eq!(ranked[0].identity_id, "s-001");
//! ```
//!
//! # Design
//!
//! Identities are soft-deleted via [`Gallery::deactivate`]: their references
//! stay in storage so historical attendance remains attributable, but they are
//! never returned by [`Gallery::query`].

mod cosine;
mod embedding;
mod error;
mod gallery;
mod identity;
mod snapshot;

pub use cosine::cosine_distance;
pub use embedding::Embedding;
pub use error::GalleryError;
pub use gallery::{Enrollment, Gallery, GalleryConfig};
pub use identity::{Candidate, Identity, ReferencePolicy};
pub use snapshot::{GallerySnapshot, IdentityRecord};
