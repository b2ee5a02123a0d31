//! Request middleware and extractors

pub mod actor;

pub use actor::{CurrentActor, DEALER_ID_HEADER, STAFF_ROLE_HEADER, USER_ID_HEADER};
