use diesel::connection::SimpleConnection;
use diesel::r2d2::ConnectionManager;
use diesel::sqlite::SqliteConnection;
use dotenv::dotenv;
use log::{info, warn};
use std::env;

use crate::models::user::{self, NewUser, Role};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

embed_migrations!();

#[derive(Debug)]
struct ConnectionSetup;

// SQLite leaves foreign keys off unless asked; the cascades on team
// deletion depend on them.
impl r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, connection: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        connection
            .batch_execute("PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn setup_dotenv() {
    dotenv().ok();
}

pub fn establish_pool(database_url: &str, max_size: u32) -> Result<DbPool, r2d2::Error> {
    r2d2::Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionSetup))
        .build(ConnectionManager::new(database_url))
}

pub fn run_migrations(
    connection: &SqliteConnection,
) -> Result<(), diesel_migrations::RunMigrationsError> {
    embedded_migrations::run(connection)
}

/// Makes sure an admin account exists so the portal can be managed on a
/// fresh database.
pub fn setup_admin(connection: &SqliteConnection) {
    let admin_email =
        env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@hackportal.local".to_string());
    let admin_password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());

    match user::get_user_by_email(connection, &admin_email) {
        Ok(_) => {
            let is_default = user::check_matching_password(connection, &admin_email, "admin")
                .unwrap_or(false);
            if is_default {
                warn!("Admin account {} still uses the default password", admin_email);
            } else {
                info!("Admin account {} already created", admin_email);
            }
        }
        Err(_) => {
            info!("Inserting admin {}...", admin_email);
            user::insert_new_user(
                connection,
                NewUser {
                    email: &admin_email,
                    password: Some(&admin_password),
                    name: Some("Admin"),
                    roles: vec![Role::Admin],
                    track: None,
                    major: None,
                },
            )
            .expect("Error saving admin user");
        }
    }
}

#[cfg(test)]
pub fn test_connection() -> SqliteConnection {
    use diesel::Connection;

    if env::var("SECRET_HASH_KEY").is_err() {
        env::set_var("SECRET_HASH_KEY", "hackportal-test-hash-key");
    }
    let connection = SqliteConnection::establish(":memory:").expect("in-memory database");
    connection
        .batch_execute("PRAGMA foreign_keys = ON;")
        .expect("foreign_keys pragma");
    run_migrations(&connection).expect("migrations should run");
    connection
}
