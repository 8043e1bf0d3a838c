pub mod expiry;
pub mod maintenance;
