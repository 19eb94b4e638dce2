pub mod alert;
pub mod error;
pub mod geo;
pub mod ids;
pub mod output;
pub mod season;
pub mod store;
pub mod time;
pub mod types;
