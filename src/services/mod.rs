pub mod api_features;
pub mod email_service;
pub mod token_service;
