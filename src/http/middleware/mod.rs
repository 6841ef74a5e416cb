pub mod cooldown;
