//! Generation of NetworkPolicy conformance test cases
//!
//! Test cases are built from a matrix of policy features (shape, target,
//! ports, peers, multi-policy combinations and multi-step actions), each
//! tagged so that runs can be narrowed with include/exclude filters.

pub mod features;
pub mod generator;
pub mod netpol_builder;
pub mod tags;
pub mod test_case;

pub use features::Features;
pub use generator::{filter_test_cases, Generator, GeneratorOptions, DEFAULT_DNS_PORT};
pub use tags::StringSet;
pub use test_case::{Action, TestCase, TestStep};
