use actix_identity::Identity;
use actix_web::{get, post, web, HttpResponse};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::models::team;
use crate::models::user::{self, NewUser, Role, User};
use crate::routes::{authenticated_user, identity_user_id};
use crate::setup::DbPool;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s").unwrap();
    static ref UPPERCASE: Regex = Regex::new(r"[A-Z]").unwrap();
    static ref LOWERCASE: Regex = Regex::new(r"[a-z]").unwrap();
    static ref DIGIT: Regex = Regex::new(r"[0-9]").unwrap();
    static ref SPECIAL: Regex = Regex::new(r"[\W_]").unwrap();
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    email: Option<String>,
    password: Option<String>,
    confirm_password: Option<String>,
    username: Option<String>,
    is_judge: Option<bool>,
    track: Option<String>,
    major: Option<String>,
}

fn validate_password(password: &str, confirm_password: Option<&str>) -> Result<(), ApiError> {
    if password.len() < 8 || password.len() > 4096 {
        return Err(ApiError::bad_request(
            "Password must be between 8 and 4096 characters long",
        ));
    }
    if WHITESPACE.is_match(password) {
        return Err(ApiError::bad_request(
            "Password cannot contain whitespace characters",
        ));
    }
    if Some(password) != confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    if !UPPERCASE.is_match(password) {
        return Err(ApiError::bad_request(
            "Password must contain at least one uppercase letter",
        ));
    }
    if !LOWERCASE.is_match(password) {
        return Err(ApiError::bad_request(
            "Password must contain at least one lowercase letter",
        ));
    }
    if !DIGIT.is_match(password) {
        return Err(ApiError::bad_request(
            "Password must contain at least one number",
        ));
    }
    if !SPECIAL.is_match(password) {
        return Err(ApiError::bad_request(
            "Password must contain at least one special character",
        ));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < 3 || username.len() > 50 {
        return Err(ApiError::bad_request(
            "Username must be between 3 and 50 characters long",
        ));
    }
    if WHITESPACE.is_match(username) {
        return Err(ApiError::bad_request(
            "Username cannot contain whitespace characters",
        ));
    }
    Ok(())
}

fn registered_response(user: &User) -> HttpResponse {
    HttpResponse::Created().json(json!({
        "message": if user.has_role(Role::Judge) {
            "Judge application submitted successfully"
        } else {
            "User created successfully"
        },
        "user": { "id": user.id, "email": user.email },
    }))
}

#[post("/register")]
pub async fn register(
    pool: web::Data<DbPool>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();

    let email = body
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email is required"))?
        .to_string();
    if !EMAIL.is_match(&email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }

    let is_judge = body.is_judge.unwrap_or(false);

    if !is_judge {
        let password = body
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::bad_request("Password is required"))?;
        validate_password(password, body.confirm_password.as_deref())?;

        let username = body
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::bad_request("Username is required"))?;
        validate_username(username)?;
    } else if let Some(password) = body.password.as_deref().filter(|p| !p.is_empty()) {
        validate_password(password, body.confirm_password.as_deref())?;
    }

    if let Some(track) = body.track.as_deref() {
        if !team::TRACKS.contains(&track) {
            return Err(ApiError::bad_request("Track must be Software or Hardware"));
        }
    }

    let user = web::block(move || {
        let connection = pool.get()?;
        if user::get_user_by_email(&connection, &email).is_ok() {
            return Err(ApiError::bad_request("Email is already registered"));
        }

        let roles = if is_judge { vec![Role::Judge] } else { vec![Role::User] };
        user::insert_new_user(
            &connection,
            NewUser {
                email: &email,
                password: body.password.as_deref().filter(|p| !p.is_empty()),
                name: body.username.as_deref(),
                roles,
                track: body.track.as_deref(),
                major: body.major.as_deref(),
            },
        )
        .map_err(|e| match e {
            user::UserHashingError::Database(e) => ApiError::Database(e),
            user::UserHashingError::Hash(e) => ApiError::Hash(e),
        })
    })
    .await??;

    Ok(registered_response(&user))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[post("/login")]
pub async fn login(
    pool: web::Data<DbPool>,
    identity: Identity,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let LoginRequest { email, password } = body.into_inner();

    let user = web::block(move || {
        let connection = pool.get()?;
        let user = match user::get_user_by_email(&connection, &email) {
            Ok(user) => user,
            Err(diesel::result::Error::NotFound) => return Err(ApiError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        let matches = match &user.hashed_password {
            Some(hashed_password) => argon2::verify_encoded(hashed_password, password.as_bytes())?,
            None => false,
        };
        if !matches {
            return Err(ApiError::InvalidCredentials);
        }
        Ok(user)
    })
    .await??;

    identity.remember(user.id.to_string());
    Ok(HttpResponse::Ok().json(json!({
        "message": "Logged in",
        "user": { "id": user.id, "email": user.email, "roles": user.roles() },
    })))
}

#[post("/logout")]
pub async fn logout(identity: Identity) -> HttpResponse {
    identity.forget();
    HttpResponse::Ok().json(json!({ "message": "Logged out" }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileJson {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub team: String,
    pub track: String,
    pub major: String,
    pub state: String,
}

#[get("/me")]
pub async fn me(pool: web::Data<DbPool>, identity: Identity) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;

    let profile = web::block(move || -> Result<ProfileJson, ApiError> {
        let connection = pool.get()?;
        let user = authenticated_user(&connection, user_id)?;
        let team_name = match user.team_id {
            Some(team_id) => team::get_team_by_id(&connection, team_id)
                .map(|t| t.name)
                .unwrap_or_default(),
            None => String::new(),
        };
        Ok(ProfileJson {
            id: user.id,
            name: user.name.clone().unwrap_or_default(),
            email: user.email.clone(),
            roles: user.roles(),
            team: team_name,
            track: user.track.clone().unwrap_or_default(),
            major: user.major.clone().unwrap_or_default(),
            state: user.state,
        })
    })
    .await??;

    Ok(HttpResponse::Ok().json(profile))
}
