pub mod calendar;
pub mod webhook;
