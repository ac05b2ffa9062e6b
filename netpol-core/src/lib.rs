//! NetworkPolicy compiler and traffic evaluator
//!
//! Translates `networking.k8s.io/v1` NetworkPolicy objects into a normalized
//! matcher model and answers whether a given connection is allowed, and which
//! policies contributed to the decision.

pub mod builder;
pub mod error;
pub mod explain;
pub mod ipblock;
pub mod loader;
pub mod peer;
pub mod policy;
pub mod port;
pub mod protocol;
pub mod selector;
pub mod simplify;
pub mod target;
pub mod traffic;

// Re-export commonly used types
pub use builder::{build_network_policies, policy_name, policy_namespace, with_default_policy_types};
pub use error::{PolicyError, Result};
pub use ipblock::IpBlock;
pub use loader::{load_policies_from_path, parse_policies};
pub use peer::{NamespaceMatcher, PeerMatcher, PodMatcher};
pub use policy::{AllowedResult, DirectionResult, Policy};
pub use port::{PortMatcher, PortValue};
pub use protocol::Protocol;
pub use selector::Labels;
pub use target::{Direction, SourceRef, Target};
pub use traffic::{InternalPeer, Traffic, TrafficPeer};
