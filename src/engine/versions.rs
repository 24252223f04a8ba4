use std::collections::{HashMap, HashSet};

use diesel::dsl::max;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::access::{ensure_read, ensure_unlocked_for, ensure_write, Viewer};
use super::audit::{self, AuditEvent, RESOURCE_DOCUMENT};
use super::documents::has_active_approval;
use super::search::{self, IndexSource};
use super::{now, DocumentStatus, EngineError, EngineResult};
use crate::models::{Document, DocumentVersion, NewDocument, NewDocumentVersion};
use crate::schema::{document_versions, documents};

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInput {
    #[serde(default)]
    pub title: Option<String>,
    pub original_content: String,
    #[serde(default)]
    pub version_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VersionOutcome {
    pub document: Document,
    pub version: DocumentVersion,
}

fn is_version_collision(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _
        ))
    )
}

/// Appends a version to the chain `document_id` belongs to. A unique
/// violation from a concurrent writer retries once.
pub fn create_version(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    input: &VersionInput,
) -> EngineResult<VersionOutcome> {
    if input.original_content.trim().is_empty() {
        return Err(EngineError::validation("content must not be empty"));
    }
    if matches!(input.title.as_deref().map(str::trim), Some("")) {
        return Err(EngineError::validation("title must not be empty"));
    }

    match try_create_version(conn, viewer, document_id, input) {
        Err(err) if is_version_collision(&err) => {
            warn!(document_id = %document_id, "version number collision, retrying");
            match try_create_version(conn, viewer, document_id, input) {
                Err(err) if is_version_collision(&err) => {
                    Err(EngineError::ConcurrentVersionConflict)
                }
                other => other,
            }
        }
        other => other,
    }
}

fn next_status(current: &str) -> String {
    let reopened = [
        DocumentStatus::Approved.as_str(),
        DocumentStatus::Rejected.as_str(),
        DocumentStatus::Completed.as_str(),
    ];
    if reopened.contains(&current) {
        DocumentStatus::Draft.as_str().to_string()
    } else {
        current.to_string()
    }
}

fn try_create_version(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    input: &VersionInput,
) -> EngineResult<VersionOutcome> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let target: Document = documents::table.find(document_id).first(conn)?;
        let root_id = target.root_document_id;

        // The chain root row serializes writers of the same chain.
        let _root: Uuid = documents::table
            .find(root_id)
            .select(documents::id)
            .for_update()
            .first(conn)?;

        let latest: Document = documents::table
            .filter(documents::root_document_id.eq(root_id))
            .filter(documents::is_latest_version.eq(true))
            .first(conn)?;

        ensure_write(viewer, &latest)?;
        ensure_unlocked_for(viewer, &latest)?;
        if latest.id != target.id {
            return Err(EngineError::invalid_state(
                "only the latest version can be edited",
            ));
        }
        if latest.is_archived {
            return Err(EngineError::invalid_state("document is archived"));
        }
        if latest.status == DocumentStatus::Deleted.as_str() {
            return Err(EngineError::invalid_state("document is deleted"));
        }
        if has_active_approval(conn, latest.id)? {
            return Err(EngineError::invalid_state(
                "document is under active approval",
            ));
        }

        let logged_max: Option<i32> = document_versions::table
            .filter(document_versions::document_id.eq(root_id))
            .select(max(document_versions::version_number))
            .first(conn)?;
        let next_number = logged_max.unwrap_or(0).max(latest.version_number) + 1;

        diesel::update(documents::table.find(latest.id))
            .set((
                documents::is_latest_version.eq(false),
                documents::updated_at.eq(now()),
            ))
            .execute(conn)?;

        let title = input
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or(&latest.title)
            .to_string();
        let search_index = search::index_value(&IndexSource {
            title: &title,
            description: latest.description.as_deref(),
            category: latest.category.as_deref(),
            tags: &latest.tags,
            original_content: &input.original_content,
            converted_content: None,
        });

        let row = NewDocument {
            id: Uuid::new_v4(),
            user_id: latest.user_id,
            organization_id: latest.organization_id,
            team_id: latest.team_id,
            title,
            description: latest.description.clone(),
            original_content: input.original_content.clone(),
            converted_content: None,
            document_type: latest.document_type.clone(),
            specialty: latest.specialty.clone(),
            category: latest.category.clone(),
            priority: latest.priority.clone(),
            status: next_status(&latest.status),
            tags: latest.tags.clone(),
            version_number: next_number,
            is_latest_version: true,
            parent_document_id: Some(latest.id),
            root_document_id: root_id,
            version_notes: input.version_notes.clone(),
            can_recall: latest.can_recall,
            visibility: latest.visibility.clone(),
            shared_with: latest.shared_with.clone(),
            locked_by: latest.locked_by,
            locked_at: latest.locked_at,
            search_index,
        };
        let document: Document = diesel::insert_into(documents::table)
            .values(&row)
            .get_result(conn)?;

        let version: DocumentVersion = diesel::insert_into(document_versions::table)
            .values(&NewDocumentVersion {
                id: Uuid::new_v4(),
                document_id: root_id,
                version_number: next_number,
                document_row_id: document.id,
                title: document.title.clone(),
                original_content: document.original_content.clone(),
                converted_content: None,
                version_notes: input.version_notes.clone(),
                created_by: viewer.user_id,
            })
            .get_result(conn)?;

        diesel::update(documents::table.find(root_id))
            .set(documents::updated_at.eq(now()))
            .execute(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: document.organization_id,
                actor: Some(viewer.user_id),
                action: "document.version_created",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document.id),
                details: json!({
                    "root_document_id": root_id,
                    "previous_document_id": latest.id,
                    "version_number": next_number,
                }),
            },
        );
        info!(
            document_id = %document.id,
            root_document_id = %root_id,
            version_number = next_number,
            "document version created"
        );
        Ok(VersionOutcome { document, version })
    })
}

/// Version log of the whole chain, newest first.
pub fn list_versions(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
) -> EngineResult<Vec<DocumentVersion>> {
    let document: Document = documents::table.find(document_id).first(conn)?;
    ensure_read(viewer, &document)?;

    Ok(document_versions::table
        .filter(document_versions::document_id.eq(document.root_document_id))
        .order(document_versions::version_number.desc())
        .load(conn)?)
}

/// Linkage fields of one chain member.
#[derive(Debug, Clone, Copy, Queryable)]
pub struct ChainLink {
    pub id: Uuid,
    pub version_number: i32,
    pub is_latest_version: bool,
    pub parent_document_id: Option<Uuid>,
    pub root_document_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainViolation {
    #[error("chain is empty")]
    Empty,
    #[error("expected exactly one latest version, found {0}")]
    LatestCount(usize),
    #[error("row {0} belongs to another root")]
    ForeignRoot(Uuid),
    #[error("root row is missing or not version 1")]
    BadRoot,
    #[error("row {row} does not follow its parent by exactly one version")]
    Gap { row: Uuid },
    #[error("row {0} has more than one child")]
    Fork(Uuid),
    #[error("row {0} is not reachable from the root")]
    Unreachable(Uuid),
    #[error("latest flag is not on the chain tail")]
    LatestNotTail,
}

/// Checks that exactly one row is latest, every row shares the root, and
/// version numbers step by one along parent links from the root to the tail.
pub fn validate_chain(root_id: Uuid, links: &[ChainLink]) -> Vec<ChainViolation> {
    let mut violations = Vec::new();
    if links.is_empty() {
        violations.push(ChainViolation::Empty);
        return violations;
    }

    let latest: Vec<&ChainLink> = links.iter().filter(|l| l.is_latest_version).collect();
    if latest.len() != 1 {
        violations.push(ChainViolation::LatestCount(latest.len()));
    }
    for link in links {
        if link.root_document_id != root_id {
            violations.push(ChainViolation::ForeignRoot(link.id));
        }
    }

    let Some(root) = links
        .iter()
        .find(|l| l.id == root_id && l.parent_document_id.is_none() && l.version_number == 1)
    else {
        violations.push(ChainViolation::BadRoot);
        return violations;
    };

    let mut children: HashMap<Uuid, Vec<&ChainLink>> = HashMap::new();
    for link in links {
        if let Some(parent) = link.parent_document_id {
            children.entry(parent).or_default().push(link);
        }
    }

    let mut current = root;
    let mut visited: HashSet<Uuid> = HashSet::from([root.id]);
    while let Some(next) = children.get(&current.id) {
        if next.len() > 1 {
            violations.push(ChainViolation::Fork(current.id));
            return violations;
        }
        let child = next[0];
        if !visited.insert(child.id) {
            break;
        }
        if child.version_number != current.version_number + 1 {
            violations.push(ChainViolation::Gap { row: child.id });
        }
        current = child;
    }

    for link in links {
        if !visited.contains(&link.id) {
            violations.push(ChainViolation::Unreachable(link.id));
        }
    }
    if latest.len() == 1 && latest[0].id != current.id {
        violations.push(ChainViolation::LatestNotTail);
    }
    violations
}

pub fn load_chain(conn: &mut PgConnection, root_id: Uuid) -> EngineResult<Vec<ChainLink>> {
    Ok(documents::table
        .filter(documents::root_document_id.eq(root_id))
        .order(documents::version_number.asc())
        .select((
            documents::id,
            documents::version_number,
            documents::is_latest_version,
            documents::parent_document_id,
            documents::root_document_id,
        ))
        .load(conn)?)
}

/// Every chain with at least one violation.
pub fn verify_all_chains(
    conn: &mut PgConnection,
) -> EngineResult<Vec<(Uuid, Vec<ChainViolation>)>> {
    let roots: Vec<Uuid> = documents::table
        .select(documents::root_document_id)
        .distinct()
        .load(conn)?;

    let mut broken = Vec::new();
    for root_id in roots {
        let links = load_chain(conn, root_id)?;
        let violations = validate_chain(root_id, &links);
        if !violations.is_empty() {
            broken.push((root_id, violations));
        }
    }
    Ok(broken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(length: i32) -> (Uuid, Vec<ChainLink>) {
        let root = Uuid::new_v4();
        let mut links = Vec::new();
        let mut parent = None;
        for number in 1..=length {
            let id = if number == 1 { root } else { Uuid::new_v4() };
            links.push(ChainLink {
                id,
                version_number: number,
                is_latest_version: number == length,
                parent_document_id: parent,
                root_document_id: root,
            });
            parent = Some(id);
        }
        (root, links)
    }

    #[test]
    fn well_formed_chain_has_no_violations() {
        let (root, links) = chain(3);
        assert!(validate_chain(root, &links).is_empty());
    }

    #[test]
    fn detects_two_latest_rows() {
        let (root, mut links) = chain(2);
        links[0].is_latest_version = true;
        let violations = validate_chain(root, &links);
        assert!(violations.contains(&ChainViolation::LatestCount(2)));
    }

    #[test]
    fn detects_version_gaps() {
        let (root, mut links) = chain(3);
        links[2].version_number = 5;
        let gap_row = links[2].id;
        assert!(validate_chain(root, &links).contains(&ChainViolation::Gap { row: gap_row }));
    }

    #[test]
    fn detects_forks() {
        let (root, mut links) = chain(2);
        links.push(ChainLink {
            id: Uuid::new_v4(),
            version_number: 2,
            is_latest_version: false,
            parent_document_id: Some(root),
            root_document_id: root,
        });
        assert!(validate_chain(root, &links).contains(&ChainViolation::Fork(root)));
    }

    #[test]
    fn detects_latest_flag_off_the_tail() {
        let (root, mut links) = chain(2);
        links[0].is_latest_version = true;
        links[1].is_latest_version = false;
        assert!(validate_chain(root, &links).contains(&ChainViolation::LatestNotTail));
    }

    #[test]
    fn detects_foreign_root() {
        let (root, mut links) = chain(2);
        links[1].root_document_id = Uuid::new_v4();
        let stray = links[1].id;
        assert!(validate_chain(root, &links).contains(&ChainViolation::ForeignRoot(stray)));
    }

    #[test]
    fn version_status_reopens_finished_documents() {
        assert_eq!(next_status("approved"), "draft");
        assert_eq!(next_status("completed"), "draft");
        assert_eq!(next_status("in_review"), "in_review");
    }
}
