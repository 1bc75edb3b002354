use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Associations)]
#[diesel(table_name = revisions)]
#[diesel(belongs_to(Document))]
pub struct Revision {
    pub id: Uuid,
    pub document_id: Uuid,
    pub label: String,
    pub is_original: bool,
    pub source_context: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = revisions)]
pub struct NewRevision {
    pub id: Uuid,
    pub document_id: Uuid,
    pub label: String,
    pub is_original: bool,
    pub source_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable)]
#[diesel(table_name = auxiliary_documents)]
pub struct AuxiliaryDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = auxiliary_documents)]
pub struct NewAuxiliaryDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
}

/// A job application pinned to a document revision, optionally carrying a
/// tailored revision and a cover letter.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Associations)]
#[diesel(table_name = job_references)]
#[diesel(belongs_to(Document))]
pub struct Reference {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub document_id: Uuid,
    pub revision_id: Uuid,
    pub derived_revision_id: Option<Uuid>,
    pub auxiliary_document_id: Option<Uuid>,
    pub company: String,
    pub position: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reference {
    /// True when the reference points at `revision_id` through any link.
    pub fn uses_revision(&self, revision_id: Uuid) -> bool {
        self.revision_id == revision_id || self.derived_revision_id == Some(revision_id)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = job_references)]
pub struct NewReference {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub document_id: Uuid,
    pub revision_id: Uuid,
    pub derived_revision_id: Option<Uuid>,
    pub auxiliary_document_id: Option<Uuid>,
    pub company: String,
    pub position: String,
    pub status: String,
}
