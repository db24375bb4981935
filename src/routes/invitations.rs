use actix_identity::Identity;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::models::invitation;
use crate::models::team;
use crate::routes::{authenticated_user, identity_user_id};
use crate::setup::DbPool;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationJson {
    pub id: i32,
    pub team_id: i32,
    pub team_name: String,
    pub status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    invitee_id: Option<i32>,
}

#[post("/invitations")]
pub async fn create_invitation(
    pool: web::Data<DbPool>,
    identity: Identity,
    body: web::Json<CreateInvitationRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let invitee_id = body
        .into_inner()
        .invitee_id
        .ok_or_else(|| ApiError::bad_request("inviteeId is required"))?;

    let created = web::block(move || -> Result<InvitationJson, ApiError> {
        let connection = pool.get()?;
        let sender = authenticated_user(&connection, user_id)?;
        let (inv, team) = invitation::create_invitation(&connection, &sender, invitee_id)?;
        Ok(InvitationJson {
            id: inv.id,
            team_id: team.id,
            team_name: team.name,
            status: inv.status,
        })
    })
    .await??;

    Ok(HttpResponse::Created().json(created))
}

/// The current user's pending invitations.
#[get("/invitations")]
pub async fn list_invitations(
    pool: web::Data<DbPool>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;

    let pending = web::block(move || -> Result<Vec<InvitationJson>, ApiError> {
        let connection = pool.get()?;
        let user = authenticated_user(&connection, user_id)?;

        let mut pending = Vec::new();
        for inv in invitation::pending_for_invitee(&connection, user.id)? {
            let team = team::get_team_by_id(&connection, inv.team_id)?;
            pending.push(InvitationJson {
                id: inv.id,
                team_id: team.id,
                team_name: team.name,
                status: inv.status,
            });
        }
        Ok(pending)
    })
    .await??;

    Ok(HttpResponse::Ok().json(pending))
}

#[post("/invitations/{id}/accept")]
pub async fn accept_invitation(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let invitation_id = path.into_inner();

    web::block(move || {
        let connection = pool.get()?;
        let invitee = authenticated_user(&connection, user_id)?;
        invitation::accept_invitation(&connection, &invitee, invitation_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({ "message": "Invitation accepted" })))
}

#[post("/invitations/{id}/decline")]
pub async fn decline_invitation(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let invitation_id = path.into_inner();

    web::block(move || {
        let connection = pool.get()?;
        let invitee = authenticated_user(&connection, user_id)?;
        invitation::decline_invitation(&connection, &invitee, invitation_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({ "message": "Invitation declined" })))
}
