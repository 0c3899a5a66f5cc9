pub mod control;
pub mod gateway;
