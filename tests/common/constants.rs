//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (user credentials, ports, etc.),
//! update only this file.

// ============================================================================
// Test User Credentials
// ============================================================================

/// Admin test user
pub const ADMIN_USER: &str = "admin";

/// Admin test user password
pub const ADMIN_PASS: &str = "adminpass123";

/// Technician test user
pub const TECH_USER: &str = "tech";

/// Technician test user password
pub const TECH_PASS: &str = "techpass123";

/// Sales agent test user
pub const SALES_USER: &str = "sales";

/// Sales agent test user password
pub const SALES_PASS: &str = "salespass123";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
