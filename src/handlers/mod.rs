// handlers/mod.rs - Handler tiers
//
// Public (no session) → Protected (session, then company membership) → Cron
// (shared secret). Routing and middleware wiring live in app.rs.

pub mod cron;
pub mod protected;
pub mod public;
