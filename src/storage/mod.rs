pub mod db;
mod media;
pub mod models;
mod pools;
mod posts;
mod similarity_data;
mod tables;

pub use db::{Database, DatabaseError, PurgeStats};
pub use pools::PairedElements;
pub use tables::*;
