use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_sections")
        .depends_on(&["0001_issuers_and_filings"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE sections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT,
    created_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE sections (
    id SERIAL PRIMARY KEY,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT,
    created_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE UNIQUE INDEX idx_sections_filing_ordinal ON sections(filing_id, ordinal)",
                )
                .for_backend(
                    "postgres",
                    "CREATE UNIQUE INDEX idx_sections_filing_ordinal ON sections(filing_id, ordinal)",
                ),
        )
}
