use actix_identity::{CookieIdentityPolicy, IdentityService};
use actix_web::{middleware, web, App, HttpServer};
use listenfd::ListenFd;
use log::info;
use std::env;

use hackportal::routes;
use hackportal::setup;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    setup::setup_dotenv();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = setup::establish_pool(&database_url, 10).expect("Failed to create database pool");

    {
        let connection = pool.get().expect("Failed to check out a connection");
        setup::run_migrations(&connection).expect("Failed to run migrations");
        setup::setup_admin(&connection);
    }

    // 32+ bytes, signs the identity cookie.
    let session_key = env::var("SECRET_SESSION_KEY").expect("SECRET_SESSION_KEY must be set");

    let pool = web::Data::new(pool);
    let mut listenfd = ListenFd::from_env();
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .wrap(middleware::Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(session_key.as_bytes())
                    .name("hackportal-session")
                    .secure(false),
            ))
            .configure(routes::configure)
    });

    server = match listenfd.take_tcp_listener(0)? {
        Some(listener) => server.listen(listener)?,
        None => {
            let bind_address =
                env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
            server.bind(bind_address)?
        }
    };

    info!("Starting hackportal server");
    server.run().await
}
