use actix_identity::Identity;
use actix_web::{delete, get, patch, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::models::invitation;
use crate::models::team::{self, JudgeAssignments, Team, TeamUpdate};
use crate::models::user::{self, Role, User};
use crate::routes::{authenticated_user, identity_user_id};
use crate::setup::DbPool;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberJson {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub track: String,
    pub state: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamProjectJson {
    pub name: String,
    pub details: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamJson {
    pub id: i32,
    pub team_name: String,
    pub status: String,
    pub track: String,
    pub project: TeamProjectJson,
    pub assignments: JudgeAssignments,
    pub leader_id: Option<i32>,
    pub members: Vec<TeamMemberJson>,
}

pub(crate) fn team_json(team: &Team, members: &[User]) -> TeamJson {
    TeamJson {
        id: team.id,
        team_name: team.name.clone(),
        status: team.status.clone(),
        track: team.track.clone(),
        project: TeamProjectJson {
            name: team.project_name.clone().unwrap_or_default(),
            details: team.project_details.clone().unwrap_or_default(),
        },
        assignments: team.assignments(),
        leader_id: team::find_leader(members).map(|leader| leader.id),
        members: members
            .iter()
            .map(|m| TeamMemberJson {
                id: m.id,
                name: m.name.clone().unwrap_or_default(),
                email: m.email.clone(),
                track: m.track.clone().unwrap_or_default(),
                state: m.state.clone(),
            })
            .collect(),
    }
}

fn team_json_by_id(
    connection: &diesel::sqlite::SqliteConnection,
    team_id: i32,
) -> Result<TeamJson, ApiError> {
    let team = match team::get_team_by_id(connection, team_id) {
        Ok(team) => team,
        Err(diesel::result::Error::NotFound) => return Err(ApiError::not_found("Team not found")),
        Err(e) => return Err(e.into()),
    };
    let members = user::get_members_of_team(connection, team.id)?;
    Ok(team_json(&team, &members))
}

fn require_leader_or_admin(actor: &User, team_id: i32) -> Result<(), ApiError> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.has_role(Role::TeamLeader) && actor.team_id == Some(team_id) {
        return Ok(());
    }
    Err(ApiError::forbidden(
        "Only the team leader or an admin can do this",
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    team_name: Option<String>,
    track: Option<String>,
}

#[post("/teams")]
pub async fn create_team(
    pool: web::Data<DbPool>,
    identity: Identity,
    body: web::Json<CreateTeamRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let body = body.into_inner();

    let created = web::block(move || {
        let connection = pool.get()?;
        let creator = authenticated_user(&connection, user_id)?;
        let name = body.team_name.as_deref().unwrap_or("");
        let team = team::create_team(&connection, &creator, name, body.track.as_deref())?;
        team_json_by_id(&connection, team.id)
    })
    .await??;

    Ok(HttpResponse::Created().json(created))
}

#[get("/teams")]
pub async fn list_teams(
    pool: web::Data<DbPool>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity_user_id(&identity)?;

    let teams = web::block(move || -> Result<Vec<TeamJson>, ApiError> {
        let connection = pool.get()?;
        let teams = team::get_teams(&connection)?;
        let users = user::get_users(&connection)?;

        let mut members_by_team: BTreeMap<i32, Vec<User>> = BTreeMap::new();
        for member in users {
            if let Some(team_id) = member.team_id {
                members_by_team.entry(team_id).or_default().push(member);
            }
        }

        Ok(teams
            .iter()
            .map(|t| {
                let members = members_by_team.remove(&t.id).unwrap_or_default();
                team_json(t, &members)
            })
            .collect::<Vec<_>>())
    })
    .await??;

    Ok(HttpResponse::Ok().json(teams))
}

#[get("/teams/{id}")]
pub async fn get_team(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    identity_user_id(&identity)?;
    let team_id = path.into_inner();

    let team = web::block(move || {
        let connection = pool.get()?;
        team_json_by_id(&connection, team_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(team))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTeamRequest {
    name: Option<String>,
    track: Option<String>,
    project_name: Option<String>,
    project_details: Option<String>,
    status: Option<String>,
    #[serde(alias = "assignments")]
    judge_assignments: Option<BTreeMap<String, Vec<i32>>>,
}

#[patch("/teams/{id}")]
pub async fn update_team(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
    body: web::Json<UpdateTeamRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let team_id = path.into_inner();
    let body = body.into_inner();

    let updated = web::block(move || {
        let connection = pool.get()?;
        let actor = authenticated_user(&connection, user_id)?;
        require_leader_or_admin(&actor, team_id)?;

        // Verification status and judge assignments are an admin concern.
        if (body.status.is_some() || body.judge_assignments.is_some()) && !actor.is_admin() {
            return Err(ApiError::forbidden(
                "Only an admin can change status or judge assignments",
            ));
        }

        let team = team::update_team(
            &connection,
            team_id,
            TeamUpdate {
                name: body.name,
                track: body.track,
                project_name: body.project_name,
                project_details: body.project_details,
                status: body.status,
                judge_assignments: body.judge_assignments,
            },
        )?;
        team_json_by_id(&connection, team.id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceMembersRequest {
    member_ids: Option<Vec<i32>>,
    leader_id: Option<i32>,
}

#[patch("/teams/{id}/users")]
pub async fn replace_members(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
    body: web::Json<ReplaceMembersRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let team_id = path.into_inner();
    let body = body.into_inner();

    let member_ids = body
        .member_ids
        .clone()
        .ok_or_else(|| ApiError::bad_request("memberIds must be an array of user ids"))?;

    let updated = web::block(move || {
        let connection = pool.get()?;
        let actor = authenticated_user(&connection, user_id)?;
        require_leader_or_admin(&actor, team_id)?;

        team::replace_members(
            &connection,
            team_id,
            &member_ids,
            body.leader_id,
            actor.is_admin(),
        )?;
        team_json_by_id(&connection, team_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/teams/{id}")]
pub async fn delete_team(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let team_id = path.into_inner();

    web::block(move || {
        let connection = pool.get()?;
        let actor = authenticated_user(&connection, user_id)?;
        require_leader_or_admin(&actor, team_id)?;
        team::delete_team(&connection, team_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({ "message": "Team deleted" })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInvitationJson {
    pub id: i32,
    pub team_id: i32,
    pub team_name: String,
    pub status: String,
    pub invitee: InviteeJson,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteeJson {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[get("/teams/{id}/invitations")]
pub async fn list_team_invitations(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let team_id = path.into_inner();

    let pending = web::block(move || {
        let connection = pool.get()?;
        let actor = authenticated_user(&connection, user_id)?;

        let team = match team::get_team_by_id(&connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };
        if actor.team_id != Some(team.id) && !actor.is_admin() {
            return Err(ApiError::forbidden("Access denied"));
        }

        let mut pending = Vec::new();
        for inv in invitation::pending_for_team(&connection, team.id)? {
            let invitee = user::get_user_by_id(&connection, inv.invitee_id)?;
            pending.push(TeamInvitationJson {
                id: inv.id,
                team_id: team.id,
                team_name: team.name.clone(),
                status: inv.status,
                invitee: InviteeJson {
                    id: invitee.id,
                    name: invitee.display_name().to_string(),
                    email: invitee.email,
                },
            });
        }
        Ok(pending)
    })
    .await??;

    Ok(HttpResponse::Ok().json(pending))
}
