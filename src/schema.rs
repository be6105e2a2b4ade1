table! {
    accounts (id) {
        id -> Integer,
        created_at -> Timestamp,
        github_id -> Nullable<BigInt>,
        github_username -> Nullable<Text>,
        oidc_subject -> Nullable<Text>,
        oidc_username -> Nullable<Text>,
        role -> Text,
        invited_by -> Nullable<Integer>,
    }
}

table! {
    session_tokens (id) {
        id -> Integer,
        token -> Text,
        account_id -> Integer,
        created_at -> Timestamp,
        last_used -> Timestamp,
        expires_at -> Timestamp,
    }
}

table! {
    upload_tokens (id) {
        id -> Integer,
        token -> Text,
        nickname -> Text,
        account_id -> Integer,
        created_at -> Timestamp,
        last_used -> Nullable<Timestamp>,
    }
}

table! {
    invite_codes (id) {
        id -> Integer,
        code -> Text,
        uses -> Integer,
        role -> Text,
        creator_id -> Nullable<Integer>,
        created_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

table! {
    files (id) {
        id -> Integer,
        file_name -> Text,
        original_name -> Text,
        uploader_id -> Integer,
        file_size -> BigInt,
        mime_type -> Text,
        public -> Bool,
        created_at -> Timestamp,
        expires_at -> Nullable<Timestamp>,
    }
}

table! {
    file_views (id) {
        id -> Integer,
        file_id -> Integer,
        ip_hash -> Text,
        created_at -> Timestamp,
    }
}

table! {
    tags (name) {
        name -> Text,
    }
}

table! {
    file_tags (file_id, tag_name) {
        file_id -> Integer,
        tag_name -> Text,
    }
}

joinable!(session_tokens -> accounts (account_id));
joinable!(upload_tokens -> accounts (account_id));
joinable!(files -> accounts (uploader_id));
joinable!(file_views -> files (file_id));
joinable!(file_tags -> files (file_id));
joinable!(file_tags -> tags (tag_name));

allow_tables_to_appear_in_same_query!(
    accounts,
    session_tokens,
    upload_tokens,
    invite_codes,
    files,
    file_views,
    tags,
    file_tags,
);
