//! mlq-reconcile
//!
//! Question reconciliation decisions.
//!
//! - Settled questions (APPROVED, COMPLETED, EXPIRED) are never selected
//! - A remote answer not reflected locally marks the question COMPLETED
//! - A closed or missing remote question marks it EXPIRED
//! - Transient failures consume the attempt budget; exhausting it flags the
//!   question for manual review
//!
//! Deterministic, pure logic. No IO. No marketplace calls.

mod eligibility;
mod engine;
pub mod remote_adapter;
mod types;

pub use eligibility::select_eligible;
pub use engine::classify;
pub use types::*;
