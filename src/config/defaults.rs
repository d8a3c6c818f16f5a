//! Default constants for identirust configuration.
//!
//! All magic numbers are centralized here with documentation.

use std::net::{IpAddr, Ipv4Addr};

// =============================================================================
// Network Defaults
// =============================================================================

/// Default HTTP listen port
pub const DEFAULT_LISTEN_PORT: u16 = 3000;

/// Host used for the default address and when only a port is supplied
/// (e.g. via `PORT`)
pub const DEFAULT_LISTEN_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

// =============================================================================
// Reconciliation Defaults
// =============================================================================

/// Optimistic plan/validate/commit attempts per identify call.
/// Each attempt restarts from the identifier lookup.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Whether the final attempt plans and commits under the exclusive lock.
/// Guarantees progress under heavy contention on a single cluster.
pub const DEFAULT_PESSIMISTIC_FALLBACK: bool = true;

// =============================================================================
// Environment
// =============================================================================

/// Prefix for environment overrides, e.g. `IDENTIRUST_STORAGE__DATA_DIR`
pub const ENV_PREFIX: &str = "IDENTIRUST_";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";
