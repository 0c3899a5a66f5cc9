//! membrane: a local serverless runtime. Function processes register over a
//! control-plane stream and the gateway routes APIs, topics, schedules,
//! queues, buckets and websockets to them.

pub mod cli;
pub mod core;
pub mod interfaces;
pub mod logging;
