//! # crewsheet
//!
//! Roster, availability and timesheet bookkeeping for event crews.
//!
//! Roster sheets are turned into per-event crew assignments
//! ([`extract`]), and every long list of work runs through the
//! [`runner::ResumableJobRunner`]: a time-boxed loop that checkpoints what is
//! left and schedules its own continuation when the budget runs out.

pub mod calendar;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod telemetry;
