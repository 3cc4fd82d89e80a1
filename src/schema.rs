// mergeaudit schema - pull and comment tables for Diesel ORM

diesel::table! {
    pulls (id) {
        id -> Integer,
        gh_owner -> Text,
        gh_repo -> Text,
        pull_number -> BigInt,
        pull_requester -> Text,
        base_sha -> Text,
        head_sha -> Text,
        pull_reviewer -> Nullable<Text>,
        merge_time -> Text,
        pull_title -> Text,
        pull_updated -> Text,
        merge_sha -> Nullable<Text>,
        work_tickets -> Nullable<Text>,
    }
}

diesel::table! {
    issue_comments (id) {
        id -> Integer,
        gh_owner -> Text,
        gh_repo -> Text,
        gh_user -> Text,
        gh_user_id -> BigInt,
        update_time -> Text,
        create_time -> Text,
        comment_id -> BigInt,
        issue_number -> BigInt,
        body -> Text,
    }
}
