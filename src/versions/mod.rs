//! Version freshness subsystem.
//!
//! Three background-driven caches resolve "what is the latest?" for charts,
//! container images and node software. Each is single-flight gated and feeds
//! the diagram generators through cheap map lookups; missing entries render
//! as `-`.

pub mod chart_checker;
pub mod gate;
pub mod image_checker;
pub mod node_checker;
pub mod registry;
pub mod semver;

pub use chart_checker::ChartChecker;
pub use gate::{CheckGate, CheckPermit};
pub use image_checker::ImageChecker;
pub use node_checker::{NodeChecker, parse_os_image};
pub use registry::{RegistryClient, RegistryError};
pub use semver::{SemVer, highest_matching_tag, highest_semver};
