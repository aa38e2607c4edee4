//! Request pipeline, outer to inner:
//!
//! ```text
//! trace → cors → security_headers → ip_guard → threat_scan → rate_limit → body limit
//!   public:    sanitize → handler
//!   protected: authenticate → sanitize → audit → require_roles / authorize → handler
//! ```

pub mod audit;
pub mod auth;
pub mod authz;
pub mod body;
pub mod client_ip;
pub mod ip_guard;
pub mod rate_limit;
pub mod response;
pub mod sanitize;
pub mod security_headers;
pub mod threat_scan;

pub use audit::audit;
pub use auth::{authenticate, AuthUser};
pub use authz::{authorize, require_roles};
pub use client_ip::ClientIp;
pub use ip_guard::ip_guard;
pub use rate_limit::rate_limit;
pub use response::{ApiResponse, ApiResult};
pub use sanitize::sanitize;
pub use security_headers::security_headers;
pub use threat_scan::threat_scan;
