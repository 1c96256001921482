//! Transactional persistence for profiles, roles, and applications
//!
//! A single fjall keyspace owned by the dispatcher process. Workers never
//! touch this store; their writes arrive as queue messages the dispatcher
//! applies. State changes flow through the typed transition function in
//! [`machine`], and per-application mutexes make transitions linearizable
//! across the dispatcher's concurrent loops.

mod entities;
mod error;
mod keys;
pub mod machine;
mod store;

pub use entities::{
    Application, ApplicationStatus, ApprovalContext, Company, Credential, DeadLetter,
    InboundMessage, Profile, ProfileInput, Role, RoleInput, RoleStatus, role_unique_hash,
};
pub use error::{Result, StoreError};
pub use machine::{Event, IllegalTransition, role_transition_allowed};
pub use store::{AppStore, PruneStats, RetentionPolicy, StoreStats};
