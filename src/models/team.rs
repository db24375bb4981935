use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::models::user::{self, Role, User};
use crate::schema::team as team_column;
use crate::schema::team;
use crate::schema::team::dsl::team as team_table;

/// Hard ceiling on confirmed members; pending invitations count against it
/// at invitation time.
pub const TEAM_CAPACITY: usize = 5;

pub const TRACKS: [&str; 2] = ["Software", "Hardware"];
pub const STATUSES: [&str; 2] = ["Verified", "Unverified"];

/// Round id -> judge user ids, stored as a JSON text column.
pub type JudgeAssignments = BTreeMap<String, Vec<i32>>;

lazy_static! {
    static ref ROUND_ID: Regex = Regex::new(r"^r[0-9]+$").unwrap();
}

#[derive(Queryable, Clone, Debug)]
pub struct Team {
    pub id: i32,
    pub name: String,
    pub status: String,
    pub track: String,
    pub project_name: Option<String>,
    pub project_details: Option<String>,
    pub judge_assignments: String,
    pub creation_instant: NaiveDateTime,
}

impl Team {
    pub fn assignments(&self) -> JudgeAssignments {
        serde_json::from_str(&self.judge_assignments).unwrap_or_default()
    }

    /// Rounds in which the given judge is assigned to this team.
    pub fn rounds_for_judge(&self, judge_id: i32) -> Vec<String> {
        self.assignments()
            .into_iter()
            .filter(|(_, judge_ids)| judge_ids.contains(&judge_id))
            .map(|(round_id, _)| round_id)
            .collect()
    }

    pub fn is_judge_assigned(&self, judge_id: i32) -> bool {
        !self.rounds_for_judge(judge_id).is_empty()
    }

    pub fn is_judge_assigned_for_round(&self, judge_id: i32, round_id: &str) -> bool {
        self.assignments()
            .get(round_id)
            .map(|judge_ids| judge_ids.contains(&judge_id))
            .unwrap_or(false)
    }
}

#[derive(Insertable)]
#[table_name = "team"]
struct DatabaseNewTeam<'a> {
    pub name: &'a str,
    pub status: &'a str,
    pub track: &'a str,
    pub judge_assignments: &'a str,
    pub creation_instant: NaiveDateTime,
}

pub fn get_teams(connection: &SqliteConnection) -> QueryResult<Vec<Team>> {
    team_table.order_by(team_column::id).load(connection)
}

pub fn get_team_by_id(connection: &SqliteConnection, id: i32) -> QueryResult<Team> {
    team_table.filter(team_column::id.eq(id)).first(connection)
}

pub fn get_team_by_name(connection: &SqliteConnection, name: &str) -> QueryResult<Team> {
    team_table
        .filter(team_column::name.eq(name))
        .first(connection)
}

fn team_name_taken(connection: &SqliteConnection, name: &str, except: Option<i32>) -> QueryResult<bool> {
    match get_team_by_name(connection, name) {
        Ok(existing) => Ok(Some(existing.id) != except),
        Err(diesel::result::Error::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Creates a team and makes `creator` its leader in one transaction.
pub fn create_team(
    connection: &SqliteConnection,
    creator: &User,
    name: &str,
    track: Option<&str>,
) -> Result<Team, ApiError> {
    if creator.team_id.is_some() {
        return Err(ApiError::bad_request("User is already in a team"));
    }

    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Team name is required"));
    }

    let track = track.unwrap_or("Software");
    if !TRACKS.contains(&track) {
        return Err(ApiError::bad_request("Track must be Software or Hardware"));
    }

    connection.transaction(|| {
        if team_name_taken(connection, name, None)? {
            return Err(ApiError::conflict("Team name already exists"));
        }

        diesel::insert_into(team_table)
            .values(DatabaseNewTeam {
                name,
                status: "Unverified",
                track,
                judge_assignments: "{}",
                creation_instant: Utc::now().naive_utc(),
            })
            .execute(connection)?;
        let inserted = get_team_by_name(connection, name)?;

        let mut roles: Vec<Role> = creator
            .roles()
            .into_iter()
            .filter(|r| *r != Role::User && *r != Role::Member)
            .collect();
        if !roles.contains(&Role::TeamLeader) {
            roles.push(Role::TeamLeader);
        }
        user::set_team_and_roles(connection, creator.id, Some(inserted.id), &roles)?;

        Ok(inserted)
    })
}

pub struct TeamUpdate {
    pub name: Option<String>,
    pub track: Option<String>,
    pub project_name: Option<String>,
    pub project_details: Option<String>,
    pub status: Option<String>,
    pub judge_assignments: Option<BTreeMap<String, Vec<i32>>>,
}

/// Field-by-field team update. `status` and `judge_assignments` are
/// admin-only and must be pre-authorized by the caller.
pub fn update_team(
    connection: &SqliteConnection,
    team_id: i32,
    update: TeamUpdate,
) -> Result<Team, ApiError> {
    connection.transaction(|| {
        let current = match get_team_by_id(connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ApiError::bad_request("Team name cannot be empty"));
            }
            if name != current.name && team_name_taken(connection, &name, Some(team_id))? {
                return Err(ApiError::conflict("Team name already exists"));
            }
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::name.eq(&name))
                .execute(connection)?;
        }

        if let Some(status) = update.status {
            if !STATUSES.contains(&status.as_str()) {
                return Err(ApiError::bad_request("Status must be Verified or Unverified"));
            }
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::status.eq(&status))
                .execute(connection)?;
        }

        if let Some(track) = update.track {
            if !TRACKS.contains(&track.as_str()) {
                return Err(ApiError::bad_request("Track must be Software or Hardware"));
            }
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::track.eq(&track))
                .execute(connection)?;
        }

        if let Some(project_name) = update.project_name {
            let trimmed = project_name.trim().to_string();
            let value = if trimmed.is_empty() { None } else { Some(trimmed) };
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::project_name.eq(value))
                .execute(connection)?;
        }

        if let Some(project_details) = update.project_details {
            let trimmed = project_details.trim().to_string();
            let value = if trimmed.is_empty() { None } else { Some(trimmed) };
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::project_details.eq(value))
                .execute(connection)?;
        }

        if let Some(assignments) = update.judge_assignments {
            let normalized = normalize_assignments(connection, assignments)?;
            let encoded = serde_json::to_string(&normalized)
                .map_err(|_| ApiError::bad_request("judgeAssignments could not be encoded"))?;
            diesel::update(team_table.filter(team_column::id.eq(team_id)))
                .set(team_column::judge_assignments.eq(encoded))
                .execute(connection)?;
        }

        Ok(get_team_by_id(connection, team_id)?)
    })
}

/// Validates round ids, deduplicates judge ids and checks every id against
/// the judge roster.
fn normalize_assignments(
    connection: &SqliteConnection,
    assignments: BTreeMap<String, Vec<i32>>,
) -> Result<JudgeAssignments, ApiError> {
    let mut normalized = JudgeAssignments::new();
    let mut all_judge_ids: Vec<i32> = Vec::new();

    for (round_id, judge_ids) in assignments {
        if !ROUND_ID.is_match(&round_id) {
            return Err(ApiError::bad_request(format!(
                "Invalid round id: {}",
                round_id
            )));
        }
        let mut deduplicated: Vec<i32> = Vec::new();
        for judge_id in judge_ids {
            if !deduplicated.contains(&judge_id) {
                deduplicated.push(judge_id);
            }
            if !all_judge_ids.contains(&judge_id) {
                all_judge_ids.push(judge_id);
            }
        }
        normalized.insert(round_id, deduplicated);
    }

    if !all_judge_ids.is_empty() {
        let judges = user::get_users_by_ids(connection, &all_judge_ids)?;
        if judges.len() != all_judge_ids.len() {
            return Err(ApiError::not_found("One or more judges were not found"));
        }
        for judge in &judges {
            if !judge.has_role(Role::Judge) {
                return Err(ApiError::bad_request(
                    "Assignments must only include judge users",
                ));
            }
        }
    }

    Ok(normalized)
}

pub fn find_leader(members: &[User]) -> Option<&User> {
    members.iter().find(|m| m.has_role(Role::TeamLeader))
}

/// Bulk membership replacement. The current leader must stay unless an
/// admin names a replacement leader from the new member set. Runs in one
/// transaction; exactly one leader holds `TeamLeader` afterwards.
pub fn replace_members(
    connection: &SqliteConnection,
    team_id: i32,
    member_ids: &[i32],
    new_leader_id: Option<i32>,
    admin_initiated: bool,
) -> Result<Vec<User>, ApiError> {
    connection.transaction(|| {
        let team = match get_team_by_id(connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };

        let mut member_ids: Vec<i32> = member_ids.to_vec();
        member_ids.sort_unstable();
        member_ids.dedup();

        if member_ids.len() > TEAM_CAPACITY {
            return Err(ApiError::bad_request(format!(
                "A team can only have up to {} members",
                TEAM_CAPACITY
            )));
        }
        if member_ids.is_empty() {
            return Err(ApiError::bad_request("A team must retain at least its leader"));
        }

        let selected = user::get_users_by_ids(connection, &member_ids)?;
        if selected.len() != member_ids.len() {
            return Err(ApiError::not_found("One or more users were not found"));
        }

        let current_members = user::get_members_of_team(connection, team.id)?;
        let current_leader = match find_leader(&current_members) {
            Some(leader) => leader.clone(),
            None => return Err(ApiError::bad_request("Team has no leader")),
        };

        let leader_id = if member_ids.contains(&current_leader.id) {
            match new_leader_id {
                Some(id) if id != current_leader.id => {
                    if !admin_initiated {
                        return Err(ApiError::forbidden(
                            "Only an admin can transfer team leadership",
                        ));
                    }
                    if !member_ids.contains(&id) {
                        return Err(ApiError::bad_request(
                            "Replacement leader must be one of the new members",
                        ));
                    }
                    id
                }
                _ => current_leader.id,
            }
        } else {
            // Dropping the sole leader requires an admin-supplied substitute.
            match new_leader_id {
                Some(id) if admin_initiated => {
                    if !member_ids.contains(&id) {
                        return Err(ApiError::bad_request(
                            "Replacement leader must be one of the new members",
                        ));
                    }
                    id
                }
                _ => {
                    return Err(ApiError::bad_request(
                        "Cannot remove team leader from team",
                    ))
                }
            }
        };

        for member in &selected {
            if let Some(other_team) = member.team_id {
                if other_team != team.id {
                    return Err(ApiError::bad_request(format!(
                        "User {} is already in another team",
                        member.id
                    )));
                }
            }
        }

        for member in &current_members {
            if !member_ids.contains(&member.id) {
                let roles: Vec<Role> = member
                    .roles()
                    .into_iter()
                    .filter(|r| *r != Role::User && *r != Role::TeamLeader && *r != Role::Member)
                    .collect();
                user::set_team_and_roles(connection, member.id, None, &roles)?;
            }
        }

        for member in &selected {
            let mut roles: Vec<Role> = member
                .roles()
                .into_iter()
                .filter(|r| *r != Role::User && *r != Role::TeamLeader && *r != Role::Member)
                .collect();
            if member.id == leader_id {
                roles.push(Role::TeamLeader);
            } else {
                roles.push(Role::Member);
            }
            user::set_team_and_roles(connection, member.id, Some(team.id), &roles)?;
        }

        Ok(user::get_members_of_team(connection, team.id)?)
    })
}

/// Disbands a team: members lose their team refs and team roles, pending
/// invitations are declined, then the row (and its invitations/reviews,
/// via FK cascade) goes away.
pub fn delete_team(connection: &SqliteConnection, team_id: i32) -> Result<(), ApiError> {
    connection.transaction(|| {
        let team = match get_team_by_id(connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };

        for member in user::get_members_of_team(connection, team.id)? {
            let roles: Vec<Role> = member
                .roles()
                .into_iter()
                .filter(|r| *r != Role::User && *r != Role::TeamLeader && *r != Role::Member)
                .collect();
            user::set_team_and_roles(connection, member.id, None, &roles)?;
        }

        crate::models::invitation::decline_pending_for_team(connection, team.id)?;

        diesel::delete(team_table.filter(team_column::id.eq(team.id))).execute(connection)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::NewUser;
    use crate::setup::test_connection;

    fn insert_user(connection: &SqliteConnection, email: &str, roles: Vec<Role>) -> User {
        user::insert_new_user(
            connection,
            NewUser {
                email,
                password: None,
                name: None,
                roles,
                track: None,
                major: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn creator_becomes_leader() {
        let connection = test_connection();
        let creator = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let team = create_team(&connection, &creator, "Alpha", Some("Software")).unwrap();

        let creator = user::get_user_by_id(&connection, creator.id).unwrap();
        assert_eq!(creator.team_id, Some(team.id));
        assert!(creator.has_role(Role::TeamLeader));
    }

    #[test]
    fn team_names_are_unique() {
        let connection = test_connection();
        let a = insert_user(&connection, "a@example.com", vec![Role::User]);
        let b = insert_user(&connection, "b@example.com", vec![Role::User]);
        create_team(&connection, &a, "Alpha", None).unwrap();

        let err = create_team(&connection, &b, "Alpha", None).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn rename_to_taken_name_conflicts() {
        let connection = test_connection();
        let a = insert_user(&connection, "a@example.com", vec![Role::User]);
        let b = insert_user(&connection, "b@example.com", vec![Role::User]);
        create_team(&connection, &a, "Alpha", None).unwrap();
        let beta = create_team(&connection, &b, "Beta", None).unwrap();

        let err = update_team(
            &connection,
            beta.id,
            TeamUpdate {
                name: Some("Alpha".to_string()),
                track: None,
                project_name: None,
                project_details: None,
                status: None,
                judge_assignments: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn membership_replacement_enforces_capacity() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();

        let mut ids = vec![leader.id];
        for i in 0..TEAM_CAPACITY {
            let u = insert_user(&connection, &format!("u{}@example.com", i), vec![Role::User]);
            ids.push(u.id);
        }

        let err = replace_members(&connection, team.id, &ids, None, false).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        ids.pop();
        let members = replace_members(&connection, team.id, &ids, None, false).unwrap();
        assert_eq!(members.len(), TEAM_CAPACITY);
    }

    #[test]
    fn leader_cannot_be_dropped_without_substitute() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let other = insert_user(&connection, "other@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();
        replace_members(&connection, team.id, &[leader.id, other.id], None, false).unwrap();

        let err = replace_members(&connection, team.id, &[other.id], None, false).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn admin_can_substitute_leader() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let other = insert_user(&connection, "other@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();
        replace_members(&connection, team.id, &[leader.id, other.id], None, false).unwrap();

        let members =
            replace_members(&connection, team.id, &[other.id], Some(other.id), true).unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].has_role(Role::TeamLeader));

        let old_leader = user::get_user_by_id(&connection, leader.id).unwrap();
        assert_eq!(old_leader.team_id, None);
        assert!(!old_leader.has_role(Role::TeamLeader));
    }

    #[test]
    fn exactly_one_leader_after_replacement() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let a = insert_user(&connection, "a@example.com", vec![Role::User]);
        let b = insert_user(&connection, "b@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();

        let members =
            replace_members(&connection, team.id, &[leader.id, a.id, b.id], None, false).unwrap();
        let leaders = members
            .iter()
            .filter(|m| m.has_role(Role::TeamLeader))
            .count();
        assert_eq!(leaders, 1);
    }

    #[test]
    fn member_of_another_team_is_rejected() {
        let connection = test_connection();
        let a = insert_user(&connection, "a@example.com", vec![Role::User]);
        let b = insert_user(&connection, "b@example.com", vec![Role::User]);
        let alpha = create_team(&connection, &a, "Alpha", None).unwrap();
        create_team(&connection, &b, "Beta", None).unwrap();

        let err = replace_members(&connection, alpha.id, &[a.id, b.id], None, false).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn delete_clears_member_refs() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();

        delete_team(&connection, team.id).unwrap();

        let leader = user::get_user_by_id(&connection, leader.id).unwrap();
        assert_eq!(leader.team_id, None);
        assert!(!leader.has_role(Role::TeamLeader));
        assert!(matches!(
            get_team_by_id(&connection, team.id),
            Err(diesel::result::Error::NotFound)
        ));
    }

    #[test]
    fn assignment_validation_rejects_non_judges() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();

        let mut assignments = BTreeMap::new();
        assignments.insert("r1".to_string(), vec![leader.id]);
        let err = update_team(
            &connection,
            team.id,
            TeamUpdate {
                name: None,
                track: None,
                project_name: None,
                project_details: None,
                status: None,
                judge_assignments: Some(assignments),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn assignment_round_ids_are_validated() {
        let connection = test_connection();
        let leader = insert_user(&connection, "lead@example.com", vec![Role::User]);
        let judge = insert_user(&connection, "judge@example.com", vec![Role::Judge]);
        let team = create_team(&connection, &leader, "Alpha", None).unwrap();

        let mut bad = BTreeMap::new();
        bad.insert("semifinal".to_string(), vec![judge.id]);
        let err = update_team(
            &connection,
            team.id,
            TeamUpdate {
                name: None,
                track: None,
                project_name: None,
                project_details: None,
                status: None,
                judge_assignments: Some(bad),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut good = BTreeMap::new();
        good.insert("r1".to_string(), vec![judge.id, judge.id]);
        let updated = update_team(
            &connection,
            team.id,
            TeamUpdate {
                name: None,
                track: None,
                project_name: None,
                project_details: None,
                status: None,
                judge_assignments: Some(good),
            },
        )
        .unwrap();
        assert_eq!(updated.assignments().get("r1"), Some(&vec![judge.id]));
        assert!(updated.is_judge_assigned(judge.id));
        assert!(updated.is_judge_assigned_for_round(judge.id, "r1"));
        assert!(!updated.is_judge_assigned_for_round(judge.id, "r2"));
    }
}
