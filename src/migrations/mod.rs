mod m0001_issuers_and_filings;
mod m0002_blobs;
mod m0003_sections;
mod m0004_analyses_and_entities;
mod m0005_diffs;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_issuers_and_filings::migration());
    reg.register(m0002_blobs::migration());
    reg.register(m0003_sections::migration());
    reg.register(m0004_analyses_and_entities::migration());
    reg.register(m0005_diffs::migration());
    reg
}
