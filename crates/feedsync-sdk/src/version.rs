//! SDK version and build metadata
//!
//! - **SDK Version** comes from Cargo.toml, never hand-written.
//! - **Build time** is emitted by vergen in build.rs.

/// SDK semver, from Cargo.toml.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build time (vergen).
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// One-line banner used in startup logs.
pub fn banner() -> String {
    format!("feedsync-sdk {} (built {})", SDK_VERSION, BUILD_TIME)
}
