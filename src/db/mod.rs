mod client;
mod models;

pub use client::{Database, DbError};
pub use models::*;
