//! Domain models for backoffice-service.

mod customer;
mod invoice;
mod money;
mod project;
mod quote;

pub use customer::*;
pub use invoice::*;
pub use money::*;
pub use project::*;
pub use quote::*;
