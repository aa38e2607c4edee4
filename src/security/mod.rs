//! Request-level protection shared by the middleware stack.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → threat.rs     (blocked client? → 403)
//!     → patterns.rs   (signature scan of path, query, body; log / 400)
//!     → rate_limit.rs (per-IP sliding window; 429)
//!     → sanitize.rs   (scrub every input string)
//!     → validation.rs (per-route schema; 400 with field errors)
//! ```

pub mod patterns;
pub mod rate_limit;
pub mod sanitize;
pub mod threat;
pub mod validation;

pub use patterns::{scan_json, scan_text, ThreatCategory, ThreatMatch};
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
pub use sanitize::{sanitize_str, sanitize_value};
pub use threat::{BlockEntry, BlockSource, IpBlocklist, ThreatEvent, ThreatMonitor};
pub use validation::{Field, Schema, ValidJson, Validate};
