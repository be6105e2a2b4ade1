#[macro_use] extern crate anyhow;
#[macro_use] extern crate diesel;

pub mod blob;
pub mod cleanup;
pub mod conf;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod s3;
pub mod schema;
pub mod web;
