use chrono::prelude::*;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::error::ApiError;
use crate::models::team::{self, Team, TEAM_CAPACITY};
use crate::models::user::{self, Role, User};
use crate::schema::invitation as invitation_column;
use crate::schema::invitation;
use crate::schema::invitation::dsl::invitation as invitation_table;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_DECLINED: &str = "declined";

#[derive(Queryable, Clone, Debug)]
pub struct Invitation {
    pub id: i32,
    pub team_id: i32,
    pub invitee_id: i32,
    pub status: String,
    pub creation_instant: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "invitation"]
struct DatabaseNewInvitation {
    pub team_id: i32,
    pub invitee_id: i32,
    pub status: String,
    pub creation_instant: NaiveDateTime,
}

pub fn get_invitation_by_id(connection: &SqliteConnection, id: i32) -> QueryResult<Invitation> {
    invitation_table
        .filter(invitation_column::id.eq(id))
        .first(connection)
}

pub fn pending_for_invitee(
    connection: &SqliteConnection,
    invitee_id: i32,
) -> QueryResult<Vec<Invitation>> {
    invitation_table
        .filter(invitation_column::invitee_id.eq(invitee_id))
        .filter(invitation_column::status.eq(STATUS_PENDING))
        .order_by(invitation_column::creation_instant.desc())
        .load(connection)
}

pub fn pending_for_team(
    connection: &SqliteConnection,
    team_id: i32,
) -> QueryResult<Vec<Invitation>> {
    invitation_table
        .filter(invitation_column::team_id.eq(team_id))
        .filter(invitation_column::status.eq(STATUS_PENDING))
        .order_by(invitation_column::creation_instant.desc())
        .load(connection)
}

fn set_status(connection: &SqliteConnection, id: i32, status: &str) -> QueryResult<()> {
    diesel::update(invitation_table.filter(invitation_column::id.eq(id)))
        .set(invitation_column::status.eq(status))
        .execute(connection)?;
    Ok(())
}

pub fn decline_pending_for_team(connection: &SqliteConnection, team_id: i32) -> QueryResult<()> {
    diesel::update(
        invitation_table
            .filter(invitation_column::team_id.eq(team_id))
            .filter(invitation_column::status.eq(STATUS_PENDING)),
    )
    .set(invitation_column::status.eq(STATUS_DECLINED))
    .execute(connection)?;
    Ok(())
}

/// Leader invites a user. Confirmed members plus pending invitations must
/// stay below the team capacity for the invite to go out.
pub fn create_invitation(
    connection: &SqliteConnection,
    sender: &User,
    invitee_id: i32,
) -> Result<(Invitation, Team), ApiError> {
    if !sender.has_role(Role::TeamLeader) {
        return Err(ApiError::forbidden(
            "Only the team leader can send invitations",
        ));
    }
    let team_id = match sender.team_id {
        Some(team_id) => team_id,
        None => return Err(ApiError::bad_request("You are not in a team")),
    };

    connection.transaction(|| {
        let team = match team::get_team_by_id(connection, team_id) {
            Ok(team) => team,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Team not found"))
            }
            Err(e) => return Err(e.into()),
        };

        let member_count = user::get_members_of_team(connection, team.id)?.len();
        let pending_count = pending_for_team(connection, team.id)?.len();
        if member_count + pending_count >= TEAM_CAPACITY {
            return Err(ApiError::bad_request(
                "Team is at capacity (including pending invitations)",
            ));
        }

        let invitee = match user::get_user_by_id(connection, invitee_id) {
            Ok(invitee) => invitee,
            Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("User not found"))
            }
            Err(e) => return Err(e.into()),
        };
        if invitee.team_id.is_some() {
            return Err(ApiError::bad_request("User is already in a team"));
        }

        let duplicate = invitation_table
            .filter(invitation_column::team_id.eq(team.id))
            .filter(invitation_column::invitee_id.eq(invitee.id))
            .filter(invitation_column::status.eq(STATUS_PENDING))
            .first::<Invitation>(connection)
            .optional()?;
        if duplicate.is_some() {
            return Err(ApiError::conflict("Invitation already sent"));
        }

        diesel::insert_into(invitation_table)
            .values(DatabaseNewInvitation {
                team_id: team.id,
                invitee_id: invitee.id,
                status: STATUS_PENDING.to_string(),
                creation_instant: Utc::now().naive_utc(),
            })
            .execute(connection)?;

        let inserted = invitation_table
            .order(invitation_column::id.desc())
            .first(connection)?;
        Ok((inserted, team))
    })
}

/// Accepting joins the team, marks this invitation accepted and declines
/// every other pending invitation of the invitee, all in one transaction.
pub fn accept_invitation(
    connection: &SqliteConnection,
    invitee: &User,
    invitation_id: i32,
) -> Result<(), ApiError> {
    connection.transaction(|| {
        let invitation = match get_invitation_by_id(connection, invitation_id) {
            Ok(invitation) if invitation.invitee_id == invitee.id => invitation,
            Ok(_) | Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Invitation not found"))
            }
            Err(e) => return Err(e.into()),
        };

        if invitation.status != STATUS_PENDING {
            return Err(ApiError::bad_request("Invitation is no longer pending"));
        }
        if invitee.team_id.is_some() {
            return Err(ApiError::bad_request("You are already in a team"));
        }

        let members = user::get_members_of_team(connection, invitation.team_id)?;
        if members.len() >= TEAM_CAPACITY {
            return Err(ApiError::bad_request("Team is already at maximum capacity"));
        }

        let mut roles: Vec<Role> = invitee
            .roles()
            .into_iter()
            .filter(|r| *r != Role::User)
            .collect();
        if !roles.contains(&Role::Member) {
            roles.push(Role::Member);
        }
        user::set_team_and_roles(connection, invitee.id, Some(invitation.team_id), &roles)?;

        set_status(connection, invitation.id, STATUS_ACCEPTED)?;

        for other in pending_for_invitee(connection, invitee.id)? {
            if other.id != invitation.id {
                set_status(connection, other.id, STATUS_DECLINED)?;
            }
        }

        Ok(())
    })
}

pub fn decline_invitation(
    connection: &SqliteConnection,
    invitee: &User,
    invitation_id: i32,
) -> Result<(), ApiError> {
    connection.transaction(|| {
        let invitation = match get_invitation_by_id(connection, invitation_id) {
            Ok(invitation) if invitation.invitee_id == invitee.id => invitation,
            Ok(_) | Err(diesel::result::Error::NotFound) => {
                return Err(ApiError::not_found("Invitation not found"))
            }
            Err(e) => return Err(e.into()),
        };

        if invitation.status != STATUS_PENDING {
            return Err(ApiError::bad_request("Invitation is no longer pending"));
        }

        set_status(connection, invitation.id, STATUS_DECLINED)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::team::create_team;
    use crate::models::user::NewUser;
    use crate::setup::test_connection;

    fn insert_user(connection: &SqliteConnection, email: &str) -> User {
        user::insert_new_user(
            connection,
            NewUser {
                email,
                password: None,
                name: None,
                roles: vec![Role::User],
                track: None,
                major: None,
            },
        )
        .unwrap()
    }

    fn leader_with_team(connection: &SqliteConnection, email: &str, name: &str) -> (User, Team) {
        let leader = insert_user(connection, email);
        let team = create_team(connection, &leader, name, None).unwrap();
        let leader = user::get_user_by_id(connection, leader.id).unwrap();
        (leader, team)
    }

    #[test]
    fn only_leaders_can_invite() {
        let connection = test_connection();
        let stranger = insert_user(&connection, "stranger@example.com");
        let invitee = insert_user(&connection, "invitee@example.com");

        let err = create_invitation(&connection, &stranger, invitee.id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn pending_invitations_count_against_capacity() {
        let connection = test_connection();
        let (leader, _) = leader_with_team(&connection, "lead@example.com", "Alpha");

        // 1 member + 4 pending invites fills the team.
        for i in 0..4 {
            let invitee = insert_user(&connection, &format!("i{}@example.com", i));
            create_invitation(&connection, &leader, invitee.id).unwrap();
        }

        let overflow = insert_user(&connection, "overflow@example.com");
        let err = create_invitation(&connection, &leader, overflow.id).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn duplicate_pending_invitation_conflicts() {
        let connection = test_connection();
        let (leader, _) = leader_with_team(&connection, "lead@example.com", "Alpha");
        let invitee = insert_user(&connection, "invitee@example.com");

        create_invitation(&connection, &leader, invitee.id).unwrap();
        let err = create_invitation(&connection, &leader, invitee.id).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn accept_joins_team_and_declines_others() {
        let connection = test_connection();
        let (leader_a, team_a) = leader_with_team(&connection, "a@example.com", "Alpha");
        let (leader_b, _) = leader_with_team(&connection, "b@example.com", "Beta");
        let invitee = insert_user(&connection, "invitee@example.com");

        let (from_a, _) = create_invitation(&connection, &leader_a, invitee.id).unwrap();
        let (from_b, _) = create_invitation(&connection, &leader_b, invitee.id).unwrap();

        accept_invitation(&connection, &invitee, from_a.id).unwrap();

        let invitee = user::get_user_by_id(&connection, invitee.id).unwrap();
        assert_eq!(invitee.team_id, Some(team_a.id));
        assert!(invitee.has_role(Role::Member));
        assert_eq!(user::get_members_of_team(&connection, team_a.id).unwrap().len(), 2);

        let from_a = get_invitation_by_id(&connection, from_a.id).unwrap();
        let from_b = get_invitation_by_id(&connection, from_b.id).unwrap();
        assert_eq!(from_a.status, STATUS_ACCEPTED);
        assert_eq!(from_b.status, STATUS_DECLINED);
        assert!(pending_for_invitee(&connection, invitee.id).unwrap().is_empty());
    }

    #[test]
    fn accept_is_terminal() {
        let connection = test_connection();
        let (leader, _) = leader_with_team(&connection, "a@example.com", "Alpha");
        let invitee = insert_user(&connection, "invitee@example.com");
        let (invitation, _) = create_invitation(&connection, &leader, invitee.id).unwrap();

        decline_invitation(&connection, &invitee, invitation.id).unwrap();
        let err = accept_invitation(&connection, &invitee, invitation.id).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn accept_rejects_full_team() {
        let connection = test_connection();
        let (leader, team) = leader_with_team(&connection, "lead@example.com", "Alpha");

        let invitee = insert_user(&connection, "late@example.com");
        let (invitation, _) = create_invitation(&connection, &leader, invitee.id).unwrap();

        // Fill the team behind the invitation's back.
        let mut ids = vec![leader.id];
        for i in 0..4 {
            let filler = insert_user(&connection, &format!("f{}@example.com", i));
            ids.push(filler.id);
        }
        team::replace_members(&connection, team.id, &ids, None, false).unwrap();

        let err = accept_invitation(&connection, &invitee, invitation.id).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn invitee_only_transitions() {
        let connection = test_connection();
        let (leader, _) = leader_with_team(&connection, "a@example.com", "Alpha");
        let invitee = insert_user(&connection, "invitee@example.com");
        let bystander = insert_user(&connection, "bystander@example.com");
        let (invitation, _) = create_invitation(&connection, &leader, invitee.id).unwrap();

        let err = accept_invitation(&connection, &bystander, invitation.id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn team_deletion_declines_pending() {
        let connection = test_connection();
        let (leader, team) = leader_with_team(&connection, "a@example.com", "Alpha");
        let invitee = insert_user(&connection, "invitee@example.com");
        let (invitation, _) = create_invitation(&connection, &leader, invitee.id).unwrap();

        team::delete_team(&connection, team.id).unwrap();

        // Row is gone with the team (FK cascade), so nothing stays pending.
        assert!(pending_for_invitee(&connection, invitee.id).unwrap().is_empty());
        assert!(matches!(
            get_invitation_by_id(&connection, invitation.id),
            Err(diesel::result::Error::NotFound)
        ));
    }
}
