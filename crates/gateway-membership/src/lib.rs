//! # gateway-membership
//!
//! Two-tier group roster cache (spec §4.4): small groups cache their full
//! roster; groups at or above `large_group_threshold` cache only the subset
//! of members with a locally-terminated connection, keeping memory charge
//! proportional to local presence rather than to group size.

pub mod cache;
pub mod error;
pub mod memory;
pub mod traits;

pub use cache::{MembershipCache, Members};
pub use error::MembershipError;
pub use memory::InMemoryMembershipSource;
pub use traits::{LocalPresence, MembershipSource};
