pub mod error;
pub mod message;
pub mod moderation;
pub mod notification;
pub mod pair;
pub mod social_graph;
pub mod streak;
pub mod trust;
pub mod user;
