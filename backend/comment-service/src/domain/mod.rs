pub mod models;
pub mod rank;
