pub mod db;
pub mod migration;
pub mod tier_manager;
pub mod tiers;
pub mod types;
