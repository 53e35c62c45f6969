//! Profile export
//!
//! Heap and contention data are written in the pprof protobuf format so the
//! standard tooling (`go tool pprof`, speedscope, Pyroscope) can read them.
//! CPU profiles come pre-assembled from the sampler and skip this module.

pub mod pprof_proto;

pub use pprof_proto::PprofExporter;
