pub mod api;
pub mod audit;
pub mod bottleneck;
pub mod controller;
pub mod db;
pub mod errors;
pub mod models;
pub mod review;
pub mod server;
pub mod store;
pub mod templates;
