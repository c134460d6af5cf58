use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0004_analyses_and_entities")
        .depends_on(&["0003_sections"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    section_id INTEGER REFERENCES sections(id),
    analysis_type TEXT NOT NULL,
    model TEXT NOT NULL,
    content TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    extra TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE analyses (
    id SERIAL PRIMARY KEY,
    job_id TEXT NOT NULL UNIQUE,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    section_id INTEGER REFERENCES sections(id),
    analysis_type TEXT NOT NULL,
    model TEXT NOT NULL,
    content TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    extra TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    section_id INTEGER REFERENCES sections(id),
    analysis_id INTEGER REFERENCES analyses(id),
    entity_type TEXT NOT NULL,
    label TEXT NOT NULL,
    confidence REAL,
    evidence TEXT,
    attributes TEXT,
    created_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE entities (
    id SERIAL PRIMARY KEY,
    filing_id TEXT NOT NULL REFERENCES filings(accession),
    section_id INTEGER REFERENCES sections(id),
    analysis_id INTEGER REFERENCES analyses(id),
    entity_type TEXT NOT NULL,
    label TEXT NOT NULL,
    confidence REAL,
    evidence TEXT,
    attributes TEXT,
    created_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_entities_analysis ON entities(analysis_id)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_entities_analysis ON entities(analysis_id)",
                ),
        )
}
