// handlers/public/mod.rs - Endpoints reachable without company membership
//
// `/` and `/health` are fully public. `/auth/refresh` only needs a valid
// session and sits behind the auth rate-limit policy.

pub mod root;
pub mod session;

pub use root::{health, root};
pub use session::session_refresh;
