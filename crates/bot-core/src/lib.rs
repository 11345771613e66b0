//! Shared bot core: world observation model, decision wire format, script
//! sandbox, and the agent engine.
//!
//! The runner binary wires these against a live gateway and model endpoint;
//! tests run the same code against in-process fakes.

pub mod agent;
pub mod llm;
