#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod setup;
