//! HTTP API: inbound courier webhooks, on-demand reconcile, and the interval
//! scheduler that drives periodic syncs.

pub mod app;
pub mod scheduler;
