//! Route handlers, one module per resource group (§6).

pub mod account;
pub mod devices;
pub mod health;
pub mod jars;
pub mod lookup;
pub mod messages;
