//! Squad Tactics - turn-based tactical combat simulation

pub mod battle;
pub mod core;
