use std::sync::Arc;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::audit::LogAuditHook;
use crate::clock::SystemClock;
use crate::engine::{Engine, EngineSettings};
use crate::model::mongodb::ensure_indexes_exist;
use crate::store::MongoStore;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // secrets
    jwt_secret: String,
}

impl Config {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Secret key the identity provider signs bearer tokens with.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    #[serde(default = "DbConfig::default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
}

impl DbConfig {
    fn default_db_name() -> String {
        "evote".to_string()
    }
}

/// A fairing that connects to MongoDB, makes sure the indexes exist, and
/// places an [`Engine`] over that database into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let settings = match rocket.figment().extract::<EngineSettings>() {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load engine settings");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");

        let client = match MongoClient::with_uri_str(&config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&config.db_name);
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to prepare database {}: {e}", config.db_name);
            return Err(rocket);
        }
        info!("...database connection online!");

        let engine = Engine::new(
            Arc::new(MongoStore::new(client, &db)),
            Arc::new(LogAuditHook),
            Arc::new(SystemClock),
            settings,
        );
        Ok(rocket.manage(engine))
    }
}

/// Example test data.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self::new("test jwt secret")
        }
    }
}
