//! Identity resolution. Credential issuance (login, SSO) lives outside this
//! service; all we do here is resolve an opaque session token to a user and
//! role through the sessions table.

pub mod session;

pub use session::{Session, SessionStore};
