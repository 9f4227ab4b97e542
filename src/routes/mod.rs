pub mod factory;
pub mod reviews;
pub mod tours;
pub mod users;
