pub mod http_client;
pub mod pattern_service;

pub use http_client::{HttpClientFactory, HttpPatternClient};
pub use pattern_service::{PatternService, PatternServiceFactory};

#[cfg(test)]
pub use pattern_service::MockPatternService;
