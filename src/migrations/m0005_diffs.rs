use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0005_diffs")
        .depends_on(&["0004_analyses_and_entities"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE diffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    current_filing_id TEXT NOT NULL UNIQUE REFERENCES filings(accession),
    previous_filing_id TEXT NOT NULL REFERENCES filings(accession),
    status TEXT NOT NULL DEFAULT 'PENDING',
    expected_sections INTEGER NOT NULL DEFAULT 0,
    processed_sections INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE diffs (
    id SERIAL PRIMARY KEY,
    current_filing_id TEXT NOT NULL UNIQUE REFERENCES filings(accession),
    previous_filing_id TEXT NOT NULL REFERENCES filings(accession),
    status TEXT NOT NULL DEFAULT 'PENDING',
    expected_sections INTEGER NOT NULL DEFAULT 0,
    processed_sections INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE section_diffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    diff_id INTEGER NOT NULL REFERENCES diffs(id),
    current_section_id INTEGER REFERENCES sections(id),
    previous_section_id INTEGER REFERENCES sections(id),
    analysis_id INTEGER REFERENCES analyses(id),
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    change_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    impact TEXT NOT NULL,
    confidence REAL,
    evidence TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE section_diffs (
    id SERIAL PRIMARY KEY,
    diff_id INTEGER NOT NULL REFERENCES diffs(id),
    current_section_id INTEGER REFERENCES sections(id),
    previous_section_id INTEGER REFERENCES sections(id),
    analysis_id INTEGER REFERENCES analyses(id),
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    change_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    impact TEXT NOT NULL,
    confidence REAL,
    evidence TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_section_diffs_diff_ordinal ON section_diffs(diff_id, ordinal)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_section_diffs_diff_ordinal ON section_diffs(diff_id, ordinal)",
                ),
        )
        // Completion marker for one (diff_id, ordinal): inserted exactly once
        // per ordinal, guarding `processed_sections` against an at-least-once
        // redelivery of the same DiffTask re-counting it.
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE diff_processed_ordinals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    diff_id INTEGER NOT NULL REFERENCES diffs(id),
    ordinal INTEGER NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE diff_processed_ordinals (
    id SERIAL PRIMARY KEY,
    diff_id INTEGER NOT NULL REFERENCES diffs(id),
    ordinal INTEGER NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE UNIQUE INDEX idx_diff_processed_ordinals_diff_ordinal ON diff_processed_ordinals(diff_id, ordinal)",
                )
                .for_backend(
                    "postgres",
                    "CREATE UNIQUE INDEX idx_diff_processed_ordinals_diff_ordinal ON diff_processed_ordinals(diff_id, ordinal)",
                ),
        )
}
