pub mod reload;
pub mod service;
