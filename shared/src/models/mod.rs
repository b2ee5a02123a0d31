//! Domain models for the EV distribution platform

mod catalog;
mod inventory;
mod order;
mod payment;
mod request;
mod staff;
mod vehicle;

pub use catalog::*;
pub use inventory::*;
pub use order::*;
pub use payment::*;
pub use request::*;
pub use staff::*;
pub use vehicle::*;
