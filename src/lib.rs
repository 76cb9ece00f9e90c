pub mod config;
pub mod db;
pub mod esi;
pub mod jobs;
pub mod model;
