pub mod auth;
pub mod blocks;
pub mod connections;
pub mod gate;
pub mod messaging;
pub mod moderation;
pub mod notifications;
pub mod reports;
pub mod streaks;
pub mod trust;
pub mod users;
