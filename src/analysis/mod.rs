//! # Transcript Analysis
//!
//! Backend half of the pipeline: once an interview ends, its transcript is
//! validated, scored by an external engine and the result stored on the
//! session.
//!
//! ## Key Components:
//! - **model**: persisted records (sessions, templates, candidates)
//! - **store**: persistence seam with conditional status updates
//! - **scoring**: scoring engine client
//! - **job**: one analysis attempt as an explicit state machine
//! - **queue**: worker pool and retry policy
//! - **enrichment**: best-effort candidate profile updates
//! - **recovery**: stuck and never-enqueued sweeps

pub mod enrichment;
pub mod job;
pub mod model;
pub mod queue;
pub mod recovery;
pub mod scoring;
pub mod store;
