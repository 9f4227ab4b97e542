pub mod auth;
pub mod auth_context;
pub mod rate_limit;
pub mod role_auth;
