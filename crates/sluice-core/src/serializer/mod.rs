//! Generic serialization of engine state to portable JSON mappings.
//!
//! - `registry` -- the static discriminator-to-converter mapping
//! - `node` -- envelope and per-variant node spec converters
//! - `workflow` -- full workflow (spec + task tree) round-trips
//!
//! Everything serializes to mappings and sequences of primitive values;
//! there are no opaque blobs, so a persistence layer can hash, diff, and
//! audit the output without knowing engine internals.

pub mod node;
pub mod registry;
pub mod workflow;

pub use registry::{ConverterRegistry, SerializerError};
pub use workflow::{decode_workflow, encode_workflow};
