use std::env;

use anyhow::{Context, Result};
use diesel::dsl::count_star;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobtrail::{
    config::AppConfig,
    db,
    schema::{documents, job_references, revisions},
};

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("audit") => audit(),
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance audit");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance audit");
            std::process::exit(1);
        }
    }
}

/// Scans for rows that break the invariants the planner maintains.
fn audit() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded jobtrail configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let empty_documents: Vec<Uuid> = documents::table
        .left_join(revisions::table)
        .filter(revisions::id.is_null())
        .select(documents::id)
        .load(&mut conn)
        .context("failed to load documents without revisions")?;

    let multiple_originals: Vec<(Uuid, i64)> = revisions::table
        .filter(revisions::is_original.eq(true))
        .group_by(revisions::document_id)
        .having(count_star().gt(1))
        .select((revisions::document_id, count_star()))
        .load(&mut conn)
        .context("failed to load documents with several original revisions")?;

    let mismatched_references: Vec<(Uuid, Uuid, Uuid)> = job_references::table
        .inner_join(revisions::table.on(revisions::id.eq(job_references::revision_id)))
        .filter(revisions::document_id.ne(job_references::document_id))
        .select((
            job_references::id,
            job_references::document_id,
            revisions::document_id,
        ))
        .load(&mut conn)
        .context("failed to load references with mismatched revisions")?;

    for document_id in &empty_documents {
        println!("document {document_id} has no revisions");
    }
    for (document_id, count) in &multiple_originals {
        println!("document {document_id} has {count} original revisions");
    }
    for (reference_id, document_id, revision_document_id) in &mismatched_references {
        println!(
            "reference {reference_id} points at document {document_id} but its revision belongs to {revision_document_id}"
        );
    }

    let problems = empty_documents.len() + multiple_originals.len() + mismatched_references.len();
    if problems == 0 {
        println!("No invariant violations found.");
    } else {
        println!("{problems} invariant violations found.");
    }
    tracing::info!(
        empty_documents = empty_documents.len(),
        multiple_originals = multiple_originals.len(),
        mismatched_references = mismatched_references.len(),
        "audit finished"
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
