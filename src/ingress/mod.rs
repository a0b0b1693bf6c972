//! Dual ingress (SPEC_FULL.md §4.7, §6): the command socket accepts
//! newline-delimited JSON command envelopes, the telemetry HTTP listener
//! serves the latest drained snapshots. Both are plain [`crate::runtime::Task`]s
//! sitting in front of the cycle engine's queues, never touching the
//! component tree directly.

pub mod command_socket;
pub mod telemetry_http;
