//! Session & Role Map (§4.8): a pure group-to-role mapper plus a Redis-backed
//! `SessionStore` with per-key TTL. Owned by the external CRUD/HTTP surface that handles
//! authentication (out of scope here); this crate only supplies the seam.

pub mod role_map;
pub mod store;

pub use role_map::RoleMapper;
pub use store::{RedisSessionStore, SentinelConfig};
