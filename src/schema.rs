//! Diesel table definitions for the filing pipeline's persistent entities.
//!
//! Columns are declared with portable Diesel types (`Text`, `Integer`,
//! `Nullable<Text>`...) so the same schema compiles against both the SQLite
//! and PostgreSQL backends selected by `repository::pool::DbPool`.
//! Timestamps are stored as RFC3339 text, matching `repository::parse_datetime`.

diesel::table! {
    issuers (cik) {
        cik -> Text,
        name -> Text,
        ticker -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    filings (accession) {
        accession -> Text,
        issuer_cik -> Text,
        form_type -> Text,
        filed_at -> Text,
        source_urls -> Text,
        status -> Text,
        downloaded_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    blobs (id) {
        id -> Integer,
        filing_id -> Text,
        kind -> Text,
        location -> Text,
        content_type -> Text,
        checksum -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    sections (id) {
        id -> Integer,
        filing_id -> Text,
        ordinal -> Integer,
        title -> Text,
        content -> Text,
        content_hash -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    analyses (id) {
        id -> Integer,
        job_id -> Text,
        filing_id -> Text,
        section_id -> Nullable<Integer>,
        analysis_type -> Text,
        model -> Text,
        content -> Text,
        prompt_tokens -> Integer,
        completion_tokens -> Integer,
        total_tokens -> Integer,
        extra -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    entities (id) {
        id -> Integer,
        filing_id -> Text,
        section_id -> Nullable<Integer>,
        analysis_id -> Nullable<Integer>,
        entity_type -> Text,
        label -> Text,
        confidence -> Nullable<Float>,
        evidence -> Nullable<Text>,
        attributes -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    diffs (id) {
        id -> Integer,
        current_filing_id -> Text,
        previous_filing_id -> Text,
        status -> Text,
        expected_sections -> Integer,
        processed_sections -> Integer,
        summary -> Nullable<Text>,
        last_error -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    section_diffs (id) {
        id -> Integer,
        diff_id -> Integer,
        current_section_id -> Nullable<Integer>,
        previous_section_id -> Nullable<Integer>,
        analysis_id -> Nullable<Integer>,
        ordinal -> Integer,
        title -> Text,
        change_type -> Text,
        summary -> Text,
        impact -> Text,
        confidence -> Nullable<Float>,
        evidence -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    diff_processed_ordinals (id) {
        id -> Integer,
        diff_id -> Integer,
        ordinal -> Integer,
    }
}

diesel::joinable!(filings -> issuers (issuer_cik));
diesel::joinable!(blobs -> filings (filing_id));
diesel::joinable!(sections -> filings (filing_id));
diesel::joinable!(analyses -> filings (filing_id));
diesel::joinable!(entities -> filings (filing_id));
diesel::joinable!(section_diffs -> diffs (diff_id));
diesel::joinable!(diff_processed_ordinals -> diffs (diff_id));

diesel::allow_tables_to_appear_in_same_query!(
    issuers,
    filings,
    blobs,
    sections,
    analyses,
    entities,
    diffs,
    section_diffs,
    diff_processed_ordinals,
);
