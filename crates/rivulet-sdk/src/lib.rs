//! Rivulet connector SDK.
//!
//! Connectors implement [`Source`], [`Stage`] or [`Sink`] and are driven by
//! the engine. Model types are re-exported from `rivulet-types`.

#![warn(clippy::pedantic)]

pub mod batch;
pub mod connector;
pub mod prelude;

pub use batch::Batch;
pub use connector::{Sink, Source, Stage};
pub use rivulet_types as types;
