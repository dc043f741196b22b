pub mod config;
pub mod cron;
pub mod token;
