//! API handlers module

pub mod cases;
pub mod dispositions;
pub mod health;
