//! # Codegen Pipeline
//!
//! Turns a natural-language request into a generated project inside a
//! sandboxed directory, verifies it and reviews the result.
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/run_task
//!          │
//!          ▼
//!   ┌──────────────┐   TaskState   ┌───────────────────────────────────────────┐
//!   │   Pipeline   │ ────────────▶ │ Analyze → Research → Generate → Evaluate │
//!   │ (per-run     │               │                        ▲          │       │
//!   │  sandbox)    │ ◀──────────── │                        └─ retry ──┘       │
//!   └──────────────┘    outcome    │                           Review         │
//!                                  └───────────────────────────────────────────┘
//!                                       │ tool calls
//!                                       ▼
//!                          ToolRegistry ─▶ Sandbox (files, commands)
//!                                       └▶ WebClient (fetch, search)
//! ```
//!
//! ## Modules
//! - `sandbox`: path confinement and command execution under one root
//! - `tools`: typed tool invocations and their dispatch
//! - `llm`: chat-completions client and the `LlmClient` seam
//! - `task`: the task state record and structured-output parsing
//! - `agents`: the five stages and the bounded tool-call loop
//! - `audit`: static check for runtime cross-origin fetches
//! - `graph`: the stage state machine
//! - `pipeline`: run entry point
//! - `api`: HTTP surface

pub mod agents;
pub mod api;
pub mod audit;
pub mod config;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod sandbox;
pub mod task;
pub mod tools;

pub use config::Config;
pub use pipeline::{Pipeline, RunOutcome, RunSettings};
