pub mod health_check_repository;
pub mod quote_repository;
pub mod refresh_run_repository;
pub mod symbol_repository;
