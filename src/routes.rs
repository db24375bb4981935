use actix_identity::Identity;
use actix_web::web;
use diesel::sqlite::SqliteConnection;

use crate::error::ApiError;
use crate::models::user::{self, User};

pub mod auth;
pub mod invitations;
pub mod judging;
pub mod teams;
pub mod users;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(auth::register)
            .service(auth::login)
            .service(auth::logout)
            .service(auth::me)
            .service(users::list_users)
            .service(users::list_judges)
            .service(users::update_profile)
            .service(users::check_in)
            .service(teams::create_team)
            .service(teams::list_teams)
            .service(teams::get_team)
            .service(teams::update_team)
            .service(teams::replace_members)
            .service(teams::delete_team)
            .service(teams::list_team_invitations)
            .service(invitations::create_invitation)
            .service(invitations::list_invitations)
            .service(invitations::accept_invitation)
            .service(invitations::decline_invitation)
            .service(judging::assigned_teams)
            .service(judging::submit_review),
    );
}

/// User id carried by the identity cookie, if any.
pub(crate) fn identity_user_id(identity: &Identity) -> Result<i32, ApiError> {
    identity
        .identity()
        .and_then(|value| value.parse::<i32>().ok())
        .ok_or(ApiError::Unauthorized)
}

pub(crate) fn authenticated_user(
    connection: &SqliteConnection,
    user_id: i32,
) -> Result<User, ApiError> {
    user::get_user_by_id(connection, user_id).map_err(|_| ApiError::Unauthorized)
}
