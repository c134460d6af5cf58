use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_issuers_and_filings")
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE issuers (
    cik TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    ticker TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE issuers (
    cik TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    ticker TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE filings (
    accession TEXT PRIMARY KEY NOT NULL,
    issuer_cik TEXT NOT NULL REFERENCES issuers(cik),
    form_type TEXT NOT NULL,
    filed_at TEXT NOT NULL,
    source_urls TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    downloaded_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE filings (
    accession TEXT PRIMARY KEY,
    issuer_cik TEXT NOT NULL REFERENCES issuers(cik),
    form_type TEXT NOT NULL,
    filed_at TEXT NOT NULL,
    source_urls TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    downloaded_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_filings_issuer_form ON filings(issuer_cik, form_type, filed_at)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_filings_issuer_form ON filings(issuer_cik, form_type, filed_at)",
                ),
        )
}
