pub mod db;
pub mod observability;
pub mod polymarket;
pub mod types;
