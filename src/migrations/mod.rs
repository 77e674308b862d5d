mod m0001_pages_revisions;
mod m0002_files_links;
mod m0003_run_ledger;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_pages_revisions::migration());
    reg.register(m0002_files_links::migration());
    reg.register(m0003_run_ledger::migration());
    reg
}
