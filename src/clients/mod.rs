//! External collaborators behind narrow seams
//!
//! The orchestration core treats the LLM, the blob store, the SMS gateway,
//! and page fetching as opaque services. Each seam is a trait (or thin
//! client) with an HTTP implementation for production and an in-memory one
//! for tests and single-process development.

pub mod artifacts;
pub mod fetch;
pub mod llm;
pub mod sms;

pub use artifacts::{ArtifactStore, DocumentKind};
pub use fetch::PageFetcher;
pub use llm::{
    DocumentEngine, DraftedDocuments, HttpDocumentEngine, RoleScore, ScrapedPosting, StaticEngine,
};
pub use sms::{HttpSmsGateway, MemorySms, OutboundSms, SmsGateway, verify_signature};
