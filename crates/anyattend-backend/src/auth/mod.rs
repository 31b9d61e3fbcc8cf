//! Admin authentication.
//!
//! Ownership challenges prove control of a numeric ID; a verified identity
//! receives a refresh session plus a short-lived JWT access token.

pub mod challenge;
pub mod claims;
pub mod jwt;
pub mod session;

pub use challenge::{ChallengeOutcome, ChallengeTicket, Delivery, OwnershipChallengeService};
pub use claims::Claims;
pub use jwt::{AccessSubject, JwtManager};
pub use session::{AdminPrincipal, AdminProfile, AdminSessionService, SessionGrant};
