pub mod health;
pub mod posts;
