//! permafrost-filter - the sidecar interception filter.
//!
//! A proxy-wasm HTTP filter deployed into each service's Envoy sidecar.
//! For every inbound request carrying a trace id it:
//!
//! 1. caches the request line and headers, removes `content-length` so a
//!    release-time body override stays possible, and buffers the body
//! 2. suspends the request and long-polls the control plane's `/check`
//!    endpoint over the `control_plane` cluster
//! 3. on the first `freeze` verdict, posts a network snapshot exactly once
//! 4. on `allow`, optionally swaps in the override body (rewriting
//!    `content-length`) and resumes
//!
//! Untagged requests pass through untouched. Every failure on this path -
//! dispatch rejection, timeout, undecodable verdict - fails open: the only
//! acceptable reason to hold a request is an explicit `freeze` decision.
//!
//! The proxy glue in [`filter`] only exists on `wasm32`; [`trace`] and
//! [`wire`] are pure and build (and test) on any target.

#[cfg(target_arch = "wasm32")]
mod filter;
pub mod trace;
pub mod wire;
