table! {
    invitation (id) {
        id -> Integer,
        team_id -> Integer,
        invitee_id -> Integer,
        status -> Text,
        creation_instant -> Timestamp,
    }
}

table! {
    review (id) {
        id -> Integer,
        team_id -> Integer,
        round_id -> Text,
        judge_id -> Integer,
        application -> Integer,
        technicality -> Integer,
        creativity -> Integer,
        functionality -> Integer,
        theme -> Bool,
        notes -> Nullable<Text>,
        submission_instant -> Timestamp,
    }
}

table! {
    team (id) {
        id -> Integer,
        name -> Text,
        status -> Text,
        track -> Text,
        project_name -> Nullable<Text>,
        project_details -> Nullable<Text>,
        judge_assignments -> Text,
        creation_instant -> Timestamp,
    }
}

table! {
    user (id) {
        id -> Integer,
        email -> Text,
        hashed_password -> Nullable<Text>,
        name -> Nullable<Text>,
        roles -> Text,
        track -> Nullable<Text>,
        major -> Nullable<Text>,
        state -> Text,
        team_id -> Nullable<Integer>,
    }
}

joinable!(invitation -> team (team_id));
joinable!(invitation -> user (invitee_id));
joinable!(review -> team (team_id));
joinable!(review -> user (judge_id));
joinable!(user -> team (team_id));

allow_tables_to_appear_in_same_query!(invitation, review, team, user,);
