pub mod json;
pub mod mongo;
pub mod populate;
pub mod seed;
pub mod store;
