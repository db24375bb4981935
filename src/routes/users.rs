use actix_identity::Identity;
use actix_web::{get, patch, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::models::team;
use crate::models::user::{self, User, ARRIVAL_STATES};
use crate::routes::{authenticated_user, identity_user_id};
use crate::setup::DbPool;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJson {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub team: String,
    pub track: String,
    pub major: String,
    pub state: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeJson {
    pub id: i32,
    pub name: String,
    pub email: String,
}

fn user_json(user: &User, team_names: &HashMap<i32, String>) -> UserJson {
    UserJson {
        id: user.id,
        name: user.name.clone().unwrap_or_default(),
        email: user.email.clone(),
        team: user
            .team_id
            .and_then(|team_id| team_names.get(&team_id).cloned())
            .unwrap_or_default(),
        track: user.track.clone().unwrap_or_default(),
        major: user.major.clone().unwrap_or_default(),
        state: user.state.clone(),
    }
}

pub(crate) fn team_names_by_id(
    connection: &diesel::sqlite::SqliteConnection,
) -> Result<HashMap<i32, String>, ApiError> {
    Ok(team::get_teams(connection)?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect())
}

/// Participant roster; judge accounts are listed through `/judges`.
#[get("/users")]
pub async fn list_users(
    pool: web::Data<DbPool>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity_user_id(&identity)?;

    let users = web::block(move || -> Result<Vec<UserJson>, ApiError> {
        let connection = pool.get()?;
        let team_names = team_names_by_id(&connection)?;
        Ok(user::get_participants(&connection)?
            .iter()
            .map(|u| user_json(u, &team_names))
            .collect::<Vec<_>>())
    })
    .await??;

    Ok(HttpResponse::Ok().json(users))
}

#[get("/judges")]
pub async fn list_judges(
    pool: web::Data<DbPool>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity_user_id(&identity)?;

    let judges = web::block(move || -> Result<Vec<JudgeJson>, ApiError> {
        let connection = pool.get()?;
        Ok(user::get_judges(&connection)?
            .into_iter()
            .map(|u| JudgeJson {
                id: u.id,
                name: u.name.clone().unwrap_or_default(),
                email: u.email,
            })
            .collect::<Vec<_>>())
    })
    .await??;

    Ok(HttpResponse::Ok().json(judges))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    track: Option<String>,
    major: Option<String>,
}

#[patch("/users/profile")]
pub async fn update_profile(
    pool: web::Data<DbPool>,
    identity: Identity,
    body: web::Json<ProfileUpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let body = body.into_inner();

    if let Some(track) = body.track.as_deref() {
        if !team::TRACKS.contains(&track) {
            return Err(ApiError::bad_request("Track must be Software or Hardware"));
        }
    }

    let updated = web::block(move || -> Result<User, ApiError> {
        let connection = pool.get()?;
        let user = authenticated_user(&connection, user_id)?;
        user::set_profile(
            &connection,
            user.id,
            body.track.as_deref(),
            body.major.as_deref(),
        )?;
        Ok(user::get_user_by_id(&connection, user.id)?)
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Profile updated successfully",
        "user": {
            "id": updated.id,
            "track": updated.track.unwrap_or_default(),
            "major": updated.major.unwrap_or_default(),
        },
    })))
}

#[derive(Deserialize)]
pub struct CheckInRequest {
    state: String,
}

/// Admin arrival management (check-in desk).
#[patch("/admin/users/{id}")]
pub async fn check_in(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
    body: web::Json<CheckInRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = identity_user_id(&identity)?;
    let target_id = path.into_inner();
    let state = body.into_inner().state;

    if !ARRIVAL_STATES.contains(&state.as_str()) {
        return Err(ApiError::bad_request(
            "State must be Pending or Checked In",
        ));
    }

    let updated = web::block(move || {
        let connection = pool.get()?;
        let admin = authenticated_user(&connection, admin_id)?;
        if !admin.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }

        if user::get_user_by_id(&connection, target_id).is_err() {
            return Err(ApiError::not_found("User not found"));
        }
        user::set_state(&connection, target_id, &state)?;

        let team_names = team_names_by_id(&connection)?;
        let updated = user::get_user_by_id(&connection, target_id)?;
        Ok(user_json(&updated, &team_names))
    })
    .await??;

    Ok(HttpResponse::Ok().json(updated))
}
