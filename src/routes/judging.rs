use actix_identity::Identity;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::models::review::{self, Review, ReviewSubmission};
use crate::models::team;
use crate::models::user::{self, Role, User};
use crate::routes::{authenticated_user, identity_user_id};
use crate::setup::DbPool;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewJson {
    pub round_id: String,
    pub judge_id: i32,
    pub application: i32,
    pub technicality: i32,
    pub creativity: i32,
    pub functionality: i32,
    pub theme: bool,
    pub review: String,
    pub total_score: i32,
}

fn review_json(review: &Review) -> ReviewJson {
    ReviewJson {
        round_id: review.round_id.clone(),
        judge_id: review.judge_id,
        application: review.application,
        technicality: review.technicality,
        creativity: review.creativity,
        functionality: review.functionality,
        theme: review.theme,
        review: review.notes.clone().unwrap_or_default(),
        total_score: review.total_score(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedMemberJson {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedTeamJson {
    pub id: i32,
    pub team_name: String,
    pub project_name: String,
    pub project_details: String,
    pub members: Vec<AssignedMemberJson>,
    pub rounds: Vec<String>,
    pub reviews: Vec<ReviewJson>,
}

/// Teams this judge is assigned to in at least one round, with whatever
/// per-round reviews already exist.
#[get("/judge/teams")]
pub async fn assigned_teams(
    pool: web::Data<DbPool>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;

    let response = web::block(move || {
        let connection = pool.get()?;
        let judge = authenticated_user(&connection, user_id)?;
        if !judge.has_role(Role::Judge) {
            return Err(ApiError::forbidden("Judge access required"));
        }

        let teams = team::get_teams(&connection)?;
        let users = user::get_users(&connection)?;

        let mut members_by_team: BTreeMap<i32, Vec<&User>> = BTreeMap::new();
        for member in &users {
            if let Some(team_id) = member.team_id {
                members_by_team.entry(team_id).or_default().push(member);
            }
        }

        let mut assigned = Vec::new();
        for t in &teams {
            let rounds = t.rounds_for_judge(judge.id);
            if rounds.is_empty() {
                continue;
            }

            let reviews = review::reviews_for_team(&connection, t.id)?
                .iter()
                .map(review_json)
                .collect();

            assigned.push(AssignedTeamJson {
                id: t.id,
                team_name: t.name.clone(),
                project_name: t.project_name.clone().unwrap_or_default(),
                project_details: t.project_details.clone().unwrap_or_default(),
                members: members_by_team
                    .get(&t.id)
                    .map(|members| {
                        members
                            .iter()
                            .map(|m| AssignedMemberJson {
                                id: m.id,
                                name: m.display_name().to_string(),
                                email: m.email.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                rounds,
                reviews,
            });
        }

        Ok(json!({
            "judge": { "id": judge.id, "name": judge.display_name() },
            "teams": assigned,
        }))
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewRequest {
    round_id: Option<String>,
    #[serde(default)]
    application: i32,
    #[serde(default)]
    technicality: i32,
    #[serde(default)]
    creativity: i32,
    #[serde(default)]
    functionality: i32,
    #[serde(default)]
    theme: bool,
    #[serde(default)]
    review: String,
}

#[post("/teams/{id}/review")]
pub async fn submit_review(
    pool: web::Data<DbPool>,
    identity: Identity,
    path: web::Path<i32>,
    body: web::Json<SubmitReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity_user_id(&identity)?;
    let team_id = path.into_inner();
    let body = body.into_inner();

    let round_id = body
        .round_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("roundId is required"))?;

    let saved = web::block(move || {
        let connection = pool.get()?;
        let judge = authenticated_user(&connection, user_id)?;

        let team = match team::get_team_by_id(&connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };

        let saved = review::submit_review(
            &connection,
            &judge,
            &team,
            ReviewSubmission {
                round_id,
                application: body.application,
                technicality: body.technicality,
                creativity: body.creativity,
                functionality: body.functionality,
                theme: body.theme,
                notes: body.review,
            },
        )?;
        Ok(review_json(&saved))
    })
    .await??;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Review saved",
        "teamId": team_id,
        "review": saved,
    })))
}
