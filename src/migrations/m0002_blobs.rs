use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_blobs")
        .depends_on(&["0001_issuers_and_filings"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    kind TEXT NOT NULL,
    location TEXT NOT NULL,
    content_type TEXT NOT NULL,
    checksum TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE blobs (
    id SERIAL PRIMARY KEY,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    kind TEXT NOT NULL,
    location TEXT NOT NULL,
    content_type TEXT NOT NULL,
    checksum TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE UNIQUE INDEX idx_blobs_filing_kind ON blobs(filing_id, kind)",
                )
                .for_backend(
                    "postgres",
                    "CREATE UNIQUE INDEX idx_blobs_filing_kind ON blobs(filing_id, kind)",
                ),
        )
}
