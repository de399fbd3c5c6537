pub mod database;
pub mod email;
pub mod lifecycle;
pub mod metrics;
pub mod notifications;
pub mod payments;
pub mod tokens;
