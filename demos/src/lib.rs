//! Conformance-sketch `Block` implementations: an amplifier, a null
//! source, and a null sink (spec §1 "example blocks... specified only as
//! conformance sketches"). These exist to give the integration tests a
//! concrete dataflow graph to drive; they are not part of the public
//! workspace API.

mod amplifier;
mod null_sink;
mod null_source;

pub use amplifier::Amplifier;
pub use null_sink::NullSink;
pub use null_source::NullSource;
