use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::error::ApiError;
use crate::models::team::Team;
use crate::models::user::{Role, User};
use crate::schema::review as review_column;
use crate::schema::review;
use crate::schema::review::dsl::review as review_table;

pub const THEME_BONUS: i32 = 5;
pub const MAX_SUB_SCORE: i32 = 5;

/// One judge review per (team, round). Re-submitting for the same round
/// overwrites that round's row only; other rounds keep their scores.
#[derive(Queryable, Clone, Debug)]
pub struct Review {
    pub id: i32,
    pub team_id: i32,
    pub round_id: String,
    pub judge_id: i32,
    pub application: i32,
    pub technicality: i32,
    pub creativity: i32,
    pub functionality: i32,
    pub theme: bool,
    pub notes: Option<String>,
    pub submission_instant: NaiveDateTime,
}

impl Review {
    pub fn total_score(&self) -> i32 {
        self.application
            + self.technicality
            + self.creativity
            + self.functionality
            + if self.theme { THEME_BONUS } else { 0 }
    }
}

#[derive(Insertable)]
#[table_name = "review"]
struct DatabaseNewReview<'a> {
    pub team_id: i32,
    pub round_id: &'a str,
    pub judge_id: i32,
    pub application: i32,
    pub technicality: i32,
    pub creativity: i32,
    pub functionality: i32,
    pub theme: bool,
    pub notes: Option<&'a str>,
    pub submission_instant: NaiveDateTime,
}

pub struct ReviewSubmission {
    pub round_id: String,
    pub application: i32,
    pub technicality: i32,
    pub creativity: i32,
    pub functionality: i32,
    pub theme: bool,
    pub notes: String,
}

pub fn reviews_for_team(connection: &SqliteConnection, team_id: i32) -> QueryResult<Vec<Review>> {
    review_table
        .filter(review_column::team_id.eq(team_id))
        .order_by(review_column::round_id)
        .load(connection)
}

pub fn get_review_for_round(
    connection: &SqliteConnection,
    team_id: i32,
    round_id: &str,
) -> QueryResult<Option<Review>> {
    review_table
        .filter(review_column::team_id.eq(team_id))
        .filter(review_column::round_id.eq(round_id))
        .first(connection)
        .optional()
}

fn check_score(value: i32) -> Result<i32, ApiError> {
    if !(0..=MAX_SUB_SCORE).contains(&value) {
        return Err(ApiError::bad_request(format!(
            "Scores must be integers from 0 to {}",
            MAX_SUB_SCORE
        )));
    }
    Ok(value)
}

/// Upserts the judge's scores for one round of a team. The judge must be
/// assigned to that round in the team's assignment map.
pub fn submit_review(
    connection: &SqliteConnection,
    judge: &User,
    team: &Team,
    submission: ReviewSubmission,
) -> Result<Review, ApiError> {
    if !judge.has_role(Role::Judge) {
        return Err(ApiError::forbidden("Judge access required"));
    }
    if !team.is_judge_assigned_for_round(judge.id, &submission.round_id) {
        return Err(ApiError::forbidden(
            "You are not assigned to review this team for this round",
        ));
    }

    let application = check_score(submission.application)?;
    let technicality = check_score(submission.technicality)?;
    let creativity = check_score(submission.creativity)?;
    let functionality = check_score(submission.functionality)?;
    let notes = submission.notes.trim().to_string();
    let notes = if notes.is_empty() { None } else { Some(notes) };

    connection.transaction(|| {
        match get_review_for_round(connection, team.id, &submission.round_id)? {
            Some(existing) => {
                diesel::update(review_table.filter(review_column::id.eq(existing.id)))
                    .set((
                        review_column::judge_id.eq(judge.id),
                        review_column::application.eq(application),
                        review_column::technicality.eq(technicality),
                        review_column::creativity.eq(creativity),
                        review_column::functionality.eq(functionality),
                        review_column::theme.eq(submission.theme),
                        review_column::notes.eq(notes.as_deref()),
                        review_column::submission_instant.eq(Utc::now().naive_utc()),
                    ))
                    .execute(connection)?;
            }
            None => {
                diesel::insert_into(review_table)
                    .values(DatabaseNewReview {
                        team_id: team.id,
                        round_id: &submission.round_id,
                        judge_id: judge.id,
                        application,
                        technicality,
                        creativity,
                        functionality,
                        theme: submission.theme,
                        notes: notes.as_deref(),
                        submission_instant: Utc::now().naive_utc(),
                    })
                    .execute(connection)?;
            }
        }

        match get_review_for_round(connection, team.id, &submission.round_id)? {
            Some(review) => Ok(review),
            None => Err(ApiError::not_found("Review not found")),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::team::{self, TeamUpdate};
    use crate::models::user::{self, NewUser};
    use crate::setup::test_connection;
    use std::collections::BTreeMap;

    fn fixture(connection: &SqliteConnection) -> (User, Team) {
        let leader = user::insert_new_user(
            connection,
            NewUser {
                email: "lead@example.com",
                password: None,
                name: None,
                roles: vec![Role::User],
                track: None,
                major: None,
            },
        )
        .unwrap();
        let judge = user::insert_new_user(
            connection,
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
        let created = team::create_team(connection, &leader, "Alpha", None).unwrap();

        let mut assignments = BTreeMap::new();
        assignments.insert("r1".to_string(), vec![judge.id]);
        let team = team::update_team(
            connection,
            created.id,
            TeamUpdate {
                name: None,
                track: None,
                project_name: None,
                project_details: None,
                status: None,
                judge_assignments: Some(assignments),
            },
        )
        .unwrap();

        (judge, team)
    }

    fn submission(round_id: &str) -> ReviewSubmission {
        ReviewSubmission {
            round_id: round_id.to_string(),
            application: 4,
            technicality: 3,
            creativity: 5,
            functionality: 2,
            theme: true,
            notes: "Solid demo".to_string(),
        }
    }

    #[test]
    fn assigned_judge_can_score_their_round() {
        let connection = test_connection();
        let (judge, team) = fixture(&connection);

        let review = submit_review(&connection, &judge, &team, submission("r1")).unwrap();
        assert_eq!(review.total_score(), 4 + 3 + 5 + 2 + THEME_BONUS);
        assert_eq!(review.notes.as_deref(), Some("Solid demo"));
    }

    #[test]
    fn unassigned_round_is_forbidden() {
        let connection = test_connection();
        let (judge, team) = fixture(&connection);

        let err = submit_review(&connection, &judge, &team, submission("r2")).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn non_judges_cannot_score() {
        let connection = test_connection();
        let (_, team) = fixture(&connection);
        let outsider = user::insert_new_user(
            &connection,
            NewUser {
                email: "outsider@example.com",
                password: None,
                name: None,
                roles: vec![Role::User],
                track: None,
                major: None,
            },
        )
        .unwrap();

        let err = submit_review(&connection, &outsider, &team, submission("r1")).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let connection = test_connection();
        let (judge, team) = fixture(&connection);

        let mut bad = submission("r1");
        bad.creativity = 6;
        let err = submit_review(&connection, &judge, &team, bad).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn resubmission_overwrites_single_round() {
        let connection = test_connection();
        let (judge, team) = fixture(&connection);

        submit_review(&connection, &judge, &team, submission("r1")).unwrap();
        let mut second = submission("r1");
        second.application = 1;
        second.theme = false;
        second.notes = String::new();
        let review = submit_review(&connection, &judge, &team, second).unwrap();

        assert_eq!(review.application, 1);
        assert_eq!(review.notes, None);
        assert_eq!(reviews_for_team(&connection, team.id).unwrap().len(), 1);
    }
}
