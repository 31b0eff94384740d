pub mod cache_reader;
pub mod error;
pub mod on_demand;
pub mod provider;
pub mod rate_limiter;
pub mod refresher;
pub mod resolver;
pub mod scheduler;
pub mod stats;

#[cfg(test)]
pub mod test_support;
