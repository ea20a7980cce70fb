pub mod devices;
pub mod health;
pub mod ingest;
pub mod token;
pub mod trash;
