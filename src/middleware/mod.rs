pub mod auth;
pub mod extract;
pub mod rate_limit;
pub mod response;
pub mod validate_company;

pub use auth::{session_auth_middleware, AuthUser, SESSION_COOKIE};
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use rate_limit::{rate_limit_middleware, RateLimitGate};
pub use response::{ApiResponse, ApiResult};
pub use validate_company::{validate_company_middleware, ValidatedMembership};
