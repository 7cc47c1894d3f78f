pub mod actuator;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod hand;
