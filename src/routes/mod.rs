pub mod access;
pub mod checkout;
pub mod downloads;
pub mod verify;
pub mod videos;
pub mod webhooks;
