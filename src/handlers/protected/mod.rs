// handlers/protected/mod.rs - Session-authenticated handlers
//
// Everything under /api/companies/:company_id runs after the company
// middleware has resolved a ValidatedMembership; mutating handlers
// additionally require manager or above through the access guard.

pub mod chat;
pub mod companies;
pub mod integrations;
pub mod sync;

pub use chat::chat_post;
pub use companies::{company_get, me_companies, me_integrations};
pub use integrations::{integration_delete, integrations_get, integrations_post};
pub use sync::{sync_cancel, sync_get, sync_post};
