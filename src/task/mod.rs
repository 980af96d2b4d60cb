//! Task module - the state threaded through a run, and its verification types.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are enforced by constructors and by who is allowed to mutate what
//! - Parsing of collaborator output is explicit (`Result`), never a silent catch-all

mod state;
pub mod structured;
mod verification;

pub use state::{ArtifactItem, Evidence, FileSpec, ProjectSpec, RunMode, TaskState};
pub use structured::{parse_structured, MalformedOutput};
pub use verification::{CheckOutcome, CheckRecord, VerificationLog, VerificationStatus};
