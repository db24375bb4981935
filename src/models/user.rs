use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

use crate::schema::user as user_column;
use crate::schema::user;
use crate::schema::user::dsl::user as user_table;

/// Roles are additive: a user may be a judge and an admin at once. Every
/// account implicitly carries `User` even when the stored set omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Judge,
    TeamLeader,
    Member,
    Admin,
}

pub const ARRIVAL_STATES: [&str; 2] = ["Pending", "Checked In"];

#[derive(Queryable, Clone, Debug)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub hashed_password: Option<String>,
    pub name: Option<String>,
    pub roles: String,
    pub track: Option<String>,
    pub major: Option<String>,
    pub state: String,
    pub team_id: Option<i32>,
}

impl User {
    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = serde_json::from_str(&self.roles).unwrap_or_default();
        if !roles.contains(&Role::User) {
            roles.push(Role::User);
        }
        roles
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles().contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

pub fn encode_roles(roles: &[Role]) -> String {
    serde_json::to_string(roles).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Insertable)]
#[table_name = "user"]
struct DatabaseNewUser<'a> {
    pub email: &'a str,
    pub hashed_password: Option<&'a str>,
    pub name: Option<&'a str>,
    pub roles: String,
    pub track: Option<&'a str>,
    pub major: Option<&'a str>,
    pub state: &'a str,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: Option<&'a str>,
    pub name: Option<&'a str>,
    pub roles: Vec<Role>,
    pub track: Option<&'a str>,
    pub major: Option<&'a str>,
}

#[derive(Error, Debug)]
pub enum UserHashingError {
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error(transparent)]
    Hash(#[from] argon2::Error),
}

fn hash_password(password: &str) -> Result<String, argon2::Error> {
    let config = argon2::Config::default();
    argon2::hash_encoded(
        password.as_bytes(),
        env::var("SECRET_HASH_KEY")
            .expect("SECRET_HASH_KEY must be set")
            .as_bytes(),
        &config,
    )
}

pub fn insert_new_user(
    connection: &SqliteConnection,
    new_user: NewUser,
) -> Result<User, UserHashingError> {
    let NewUser {
        email,
        password,
        name,
        roles,
        track,
        major,
    } = new_user;

    let hashed_password = match password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    diesel::insert_into(user_table)
        .values(DatabaseNewUser {
            email,
            hashed_password: hashed_password.as_deref(),
            name,
            roles: encode_roles(&roles),
            track,
            major,
            state: "Pending",
        })
        .execute(connection)?;

    Ok(get_user_by_email(connection, email)?)
}

pub fn get_user_by_id(connection: &SqliteConnection, id: i32) -> QueryResult<User> {
    user_table.filter(user_column::id.eq(id)).first(connection)
}

pub fn get_user_by_email(connection: &SqliteConnection, email: &str) -> QueryResult<User> {
    user_table
        .filter(user_column::email.eq(email))
        .first(connection)
}

pub fn get_users_by_ids(connection: &SqliteConnection, ids: &[i32]) -> QueryResult<Vec<User>> {
    user_table
        .filter(user_column::id.eq_any(ids))
        .load(connection)
}

pub fn get_users(connection: &SqliteConnection) -> QueryResult<Vec<User>> {
    user_table.order_by(user_column::id).load(connection)
}

/// Roster of participants: everyone except judge accounts.
pub fn get_participants(connection: &SqliteConnection) -> QueryResult<Vec<User>> {
    Ok(get_users(connection)?
        .into_iter()
        .filter(|u| !u.has_role(Role::Judge))
        .collect())
}

pub fn get_judges(connection: &SqliteConnection) -> QueryResult<Vec<User>> {
    Ok(get_users(connection)?
        .into_iter()
        .filter(|u| u.has_role(Role::Judge))
        .collect())
}

pub fn get_members_of_team(connection: &SqliteConnection, team_id: i32) -> QueryResult<Vec<User>> {
    user_table
        .filter(user_column::team_id.eq(team_id))
        .order_by(user_column::id)
        .load(connection)
}

pub fn check_matching_password(
    connection: &SqliteConnection,
    email: &str,
    password: &str,
) -> Result<bool, UserHashingError> {
    let user: User = user_table
        .filter(user_column::email.eq(email))
        .first(connection)?;
    match user.hashed_password {
        Some(hashed_password) => Ok(argon2::verify_encoded(
            &hashed_password,
            password.as_bytes(),
        )?),
        None => Ok(false),
    }
}

pub fn set_profile(
    connection: &SqliteConnection,
    id: i32,
    track: Option<&str>,
    major: Option<&str>,
) -> QueryResult<()> {
    if let Some(track) = track {
        diesel::update(user_table.filter(user_column::id.eq(id)))
            .set(user_column::track.eq(track))
            .execute(connection)?;
    }
    if let Some(major) = major {
        diesel::update(user_table.filter(user_column::id.eq(id)))
            .set(user_column::major.eq(major))
            .execute(connection)?;
    }
    Ok(())
}

pub fn set_state(connection: &SqliteConnection, id: i32, state: &str) -> QueryResult<()> {
    diesel::update(user_table.filter(user_column::id.eq(id)))
        .set(user_column::state.eq(state))
        .execute(connection)?;
    Ok(())
}

pub fn set_team_and_roles(
    connection: &SqliteConnection,
    id: i32,
    team_id: Option<i32>,
    roles: &[Role],
) -> QueryResult<()> {
    diesel::update(user_table.filter(user_column::id.eq(id)))
        .set((
            user_column::team_id.eq(team_id),
            user_column::roles.eq(encode_roles(roles)),
        ))
        .execute(connection)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::test_connection;

    #[test]
    fn roles_always_include_user() {
        let connection = test_connection();
        let judge = insert_new_user(
            &connection,
            NewUser {
                email: "judge@example.com",
                password: None,
                name: Some("Judge One"),
                roles: vec![Role::Judge],
                track: None,
                major: None,
            },
        )
        .unwrap();

        assert!(judge.has_role(Role::Judge));
        assert!(judge.has_role(Role::User));
        assert!(!judge.has_role(Role::Admin));
    }

    #[test]
    fn password_verification_round_trip() {
        let connection = test_connection();
        insert_new_user(
            &connection,
            NewUser {
                email: "ava@example.com",
                password: Some("Hunter2!aaa"),
                name: Some("Ava"),
                roles: vec![Role::User],
                track: Some("Software"),
                major: None,
            },
        )
        .unwrap();

        assert!(check_matching_password(&connection, "ava@example.com", "Hunter2!aaa").unwrap());
        assert!(!check_matching_password(&connection, "ava@example.com", "wrong").unwrap());
    }

    #[test]
    fn passwordless_account_never_matches() {
        let connection = test_connection();
        insert_new_user(
            &connection,
            NewUser {
                email: "applicant@example.com",
                password: None,
                name: None,
                roles: vec![Role::Judge],
                track: None,
                major: None,
            },
        )
        .unwrap();

        assert!(
            !check_matching_password(&connection, "applicant@example.com", "anything").unwrap()
        );
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let connection = test_connection();
        let new_user = || NewUser {
            email: "dup@example.com",
            password: None,
            name: None,
            roles: vec![Role::User],
            track: None,
            major: None,
        };
        insert_new_user(&connection, new_user()).unwrap();
        assert!(insert_new_user(&connection, new_user()).is_err());
    }
}
