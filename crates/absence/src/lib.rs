//! Absence requests and the people they concern.

pub mod people;
pub mod request;

pub use people::{Person, Stakeholder};
pub use request::{AbsenceRequest, AbsenceStatus, NewAbsenceRequest, ENTITY_TYPE};
