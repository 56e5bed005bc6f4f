pub mod art;
pub mod cache;
pub mod dispatch;
pub mod health;
