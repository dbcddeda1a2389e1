//! Per-data-standard strategy profiles.
//!
//! The assembly and completion pipelines are generic over the data
//! standard; everything that differs between standards lives in a
//! [`StandardProfile`].

mod profile;

pub use profile::{StandardOverrides, StandardProfile, StandardRegistry};
