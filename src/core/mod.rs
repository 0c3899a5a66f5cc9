pub mod config;
pub mod container;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod stream;
pub mod terminal;
pub mod worker;
