pub mod notification;
pub mod party;
pub mod request;
