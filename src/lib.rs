#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod audit;
pub mod clock;
pub mod closer;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod store;

pub use config::Config;

use closer::ElectionCloserFairing;
use config::{ConfigFairing, DatabaseFairing};
use engine::Engine;
use logging::LoggerFairing;

/// The production server: configuration and the MongoDB-backed engine are
/// loaded from the figment when the server ignites.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ElectionCloserFairing)
        .attach(LoggerFairing)
}

/// A server over an engine that has already been put together, e.g. one
/// over an in-memory store.
pub fn rocket_for_engine(engine: Engine, config: Config) -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .manage(config)
        .manage(engine)
        .attach(LoggerFairing)
}
