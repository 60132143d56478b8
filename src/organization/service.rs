//! Organization and membership operations.
//!
//! Membership mutations take the shared write lock on [`AppState`] so that
//! they serialize with ride operations that read membership flags.

use sqlx::{FromRow, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use super::access_code;
use super::capabilities::{self, Capabilities};
use crate::db::{
    now_timestamp, AddMemberRequest, CreateOrganizationRequest, Organization, OrganizationDetail,
    OrganizationDriver, OrganizationMember, OrganizationMemberWithUser, OrganizationSummary,
    UpdateMemberRoleRequest, UpdateOrganizationRequest, User,
};
use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::AppState;

/// Attempts at drawing an unused access code before giving up
const ACCESS_CODE_ATTEMPTS: usize = 16;

const MEMBER_SELECT: &str = r#"
    SELECT m.id, m.organization_id, m.user_id, m.is_owner, m.is_admin, m.is_driver,
           m.joined_at, u.name AS user_name, u.email AS user_email
    FROM organization_members m
    JOIN users u ON u.id = m.user_id
"#;

#[derive(Debug, FromRow)]
struct OrganizationRow {
    id: String,
    name: String,
    description: Option<String>,
    access_code: String,
    created_at: String,
    is_owner: bool,
    is_admin: bool,
    is_driver: bool,
    member_count: i64,
}

impl From<OrganizationRow> for OrganizationSummary {
    fn from(row: OrganizationRow) -> Self {
        let caps = Capabilities {
            is_owner: row.is_owner,
            is_admin: row.is_admin,
            is_driver: row.is_driver,
        };
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            member_count: row.member_count,
            access_code: caps.can_see_access_code().then_some(row.access_code),
            is_owner: caps.is_owner,
            is_admin: caps.is_admin,
            is_driver: caps.is_driver,
            created_at: row.created_at,
        }
    }
}

pub async fn find(conn: &mut SqliteConnection, org_id: &str) -> ServiceResult<Organization> {
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
        .bind(org_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Organization not found"))
}

pub async fn membership(
    conn: &mut SqliteConnection,
    org_id: &str,
    user_id: &str,
) -> Result<Option<OrganizationMember>, sqlx::Error> {
    sqlx::query_as::<_, OrganizationMember>(
        "SELECT * FROM organization_members WHERE organization_id = ? AND user_id = ?",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
}

/// Membership of `user_id`, failing with `NotFound` for an unknown
/// organization and `NotAuthorized` for a non-member
pub async fn require_member(
    conn: &mut SqliteConnection,
    org_id: &str,
    user_id: &str,
) -> ServiceResult<OrganizationMember> {
    find(conn, org_id).await?;
    membership(conn, org_id, user_id)
        .await?
        .ok_or_else(|| ServiceError::not_authorized("You are not a member of this organization"))
}

async fn summary_for(
    conn: &mut SqliteConnection,
    org_id: &str,
    user_id: &str,
) -> ServiceResult<OrganizationSummary> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT o.id, o.name, o.description, o.access_code, o.created_at,
               m.is_owner, m.is_admin, m.is_driver,
               (SELECT COUNT(*) FROM organization_members c WHERE c.organization_id = o.id) AS member_count
        FROM organizations o
        JOIN organization_members m ON m.organization_id = o.id
        WHERE o.id = ? AND m.user_id = ?
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ServiceError::not_authorized("You are not a member of this organization"))?;
    Ok(row.into())
}

async fn member_with_user(
    conn: &mut SqliteConnection,
    org_id: &str,
    user_id: &str,
) -> ServiceResult<OrganizationMemberWithUser> {
    let sql = format!("{} WHERE m.organization_id = ? AND m.user_id = ?", MEMBER_SELECT);
    sqlx::query_as::<_, OrganizationMemberWithUser>(&sql)
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::NotAMember("User is not a member of this organization".into()))
}

async fn unused_access_code(conn: &mut SqliteConnection, length: usize) -> ServiceResult<String> {
    for _ in 0..ACCESS_CODE_ATTEMPTS {
        let code = access_code::generate(length);
        let taken: Option<(String,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE access_code = ?")
                .bind(&code)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            return Ok(code);
        }
    }
    Err(ServiceError::validation(
        "access_code",
        "Could not allocate a unique access code",
    ))
}

/// Create an organization with the caller as its owner
pub async fn create(
    state: &AppState,
    user: &User,
    req: CreateOrganizationRequest,
) -> ServiceResult<OrganizationSummary> {
    let name = req.name.trim().to_string();
    let description = req
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let code = unused_access_code(&mut tx, state.config.organizations.access_code_length).await?;
    let org_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let inserted = sqlx::query(
        "INSERT INTO organizations (id, name, description, access_code, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&org_id)
    .bind(&name)
    .bind(&description)
    .bind(&code)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await;
    match inserted {
        Err(e) if is_unique_violation(&e) => {
            return Err(ServiceError::validation(
                "name",
                "An organization with this name already exists",
            ));
        }
        other => {
            other?;
        }
    }

    let owner = Capabilities::owner();
    sqlx::query(
        "INSERT INTO organization_members (id, organization_id, user_id, is_owner, is_admin, is_driver, joined_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&org_id)
    .bind(&user.id)
    .bind(owner.is_owner)
    .bind(owner.is_admin)
    .bind(owner.is_driver)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let summary = summary_for(&mut tx, &org_id, &user.id).await?;
    tx.commit().await?;

    info!(organization_id = %org_id, owner = %user.id, "Organization created");
    Ok(summary)
}

/// Organizations the user belongs to, with the user's capabilities
pub async fn list_for_user(state: &AppState, user: &User) -> ServiceResult<Vec<OrganizationSummary>> {
    let rows = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT o.id, o.name, o.description, o.access_code, o.created_at,
               m.is_owner, m.is_admin, m.is_driver,
               (SELECT COUNT(*) FROM organization_members c WHERE c.organization_id = o.id) AS member_count
        FROM organizations o
        JOIN organization_members m ON m.organization_id = o.id
        WHERE m.user_id = ?
        ORDER BY o.name ASC
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get(state: &AppState, user: &User, org_id: &str) -> ServiceResult<OrganizationDetail> {
    let mut conn = state.db.acquire().await?;
    require_member(&mut conn, org_id, &user.id).await?;
    let summary = summary_for(&mut conn, org_id, &user.id).await?;
    let members = list_members_on(&mut conn, org_id).await?;
    Ok(OrganizationDetail { summary, members })
}

async fn list_members_on(
    conn: &mut SqliteConnection,
    org_id: &str,
) -> ServiceResult<Vec<OrganizationMemberWithUser>> {
    let sql = format!(
        "{} WHERE m.organization_id = ? ORDER BY m.is_owner DESC, m.is_admin DESC, m.joined_at ASC",
        MEMBER_SELECT
    );
    let members = sqlx::query_as::<_, OrganizationMemberWithUser>(&sql)
        .bind(org_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(members)
}

/// Members of an organization, owner first; visible to members only
pub async fn members(
    state: &AppState,
    user: &User,
    org_id: &str,
) -> ServiceResult<Vec<OrganizationMemberWithUser>> {
    let mut conn = state.db.acquire().await?;
    require_member(&mut conn, org_id, &user.id).await?;
    list_members_on(&mut conn, org_id).await
}

/// Members who can drive here (driver flag or ownership) and hold an approved
/// driver profile
pub async fn drivers(
    state: &AppState,
    user: &User,
    org_id: &str,
) -> ServiceResult<Vec<OrganizationDriver>> {
    let mut conn = state.db.acquire().await?;
    require_member(&mut conn, org_id, &user.id).await?;

    let drivers = sqlx::query_as::<_, OrganizationDriver>(
        r#"
        SELECT u.id AS user_id, u.name, u.email, d.id AS driver_id,
               d.vehicle_description, d.license_plate, d.average_rating, d.review_count
        FROM organization_members m
        JOIN users u ON u.id = m.user_id
        JOIN driver_profiles d ON d.user_id = m.user_id
        WHERE m.organization_id = ? AND (m.is_driver = 1 OR m.is_owner = 1)
          AND d.is_approved = 1
        ORDER BY u.name ASC
        "#,
    )
    .bind(org_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(drivers)
}

pub async fn update(
    state: &AppState,
    user: &User,
    org_id: &str,
    req: UpdateOrganizationRequest,
) -> ServiceResult<OrganizationSummary> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    let actor = require_member(&mut tx, org_id, &user.id).await?;
    if !Capabilities::from(&actor).can_edit_organization() {
        return Err(ServiceError::not_authorized(
            "Only admins can edit the organization",
        ));
    }

    let existing = find(&mut tx, org_id).await?;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .unwrap_or(existing.name);
    let description = match req.description {
        Some(d) if d.trim().is_empty() => None,
        Some(d) => Some(d.trim().to_string()),
        None => existing.description,
    };

    let updated = sqlx::query(
        "UPDATE organizations SET name = ?, description = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&description)
    .bind(now_timestamp())
    .bind(org_id)
    .execute(&mut *tx)
    .await;
    match updated {
        Err(e) if is_unique_violation(&e) => {
            return Err(ServiceError::validation(
                "name",
                "An organization with this name already exists",
            ));
        }
        other => {
            other?;
        }
    }

    let summary = summary_for(&mut tx, org_id, &user.id).await?;
    tx.commit().await?;
    info!(organization_id = %org_id, "Organization updated");
    Ok(summary)
}

/// Delete an organization together with its memberships and rides
pub async fn delete(state: &AppState, user: &User, org_id: &str) -> ServiceResult<()> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    let actor = require_member(&mut tx, org_id, &user.id).await?;
    if !Capabilities::from(&actor).can_delete_organization() {
        return Err(ServiceError::not_authorized(
            "Only the owner can delete the organization",
        ));
    }

    sqlx::query("DELETE FROM organizations WHERE id = ?")
        .bind(org_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(organization_id = %org_id, "Organization deleted");
    Ok(())
}

/// Join with a shared access code
pub async fn join(state: &AppState, user: &User, code: &str) -> ServiceResult<OrganizationSummary> {
    let code = access_code::normalize(code);
    if code.is_empty() {
        return Err(ServiceError::InvalidAccessCode);
    }

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;

    let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE access_code = ?")
        .bind(&code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::InvalidAccessCode)?;

    if membership(&mut tx, &org.id, &user.id).await?.is_some() {
        return Err(ServiceError::AlreadyMember(
            "You are already a member of this organization".to_string(),
        ));
    }

    sqlx::query(
        "INSERT INTO organization_members (id, organization_id, user_id, joined_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&org.id)
    .bind(&user.id)
    .bind(now_timestamp())
    .execute(&mut *tx)
    .await?;

    let summary = summary_for(&mut tx, &org.id, &user.id).await?;
    tx.commit().await?;

    info!(organization_id = %org.id, user_id = %user.id, "Member joined organization");
    Ok(summary)
}

/// Remove the caller's own membership
pub async fn leave(state: &AppState, user: &User, org_id: &str) -> ServiceResult<()> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    find(&mut tx, org_id).await?;

    let member = membership(&mut tx, org_id, &user.id)
        .await?
        .ok_or_else(|| ServiceError::NotAMember("You are not a member of this organization".into()))?;
    if member.is_owner {
        return Err(ServiceError::CannotModifyOwner);
    }

    sqlx::query("DELETE FROM organization_members WHERE id = ?")
        .bind(&member.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(organization_id = %org_id, user_id = %user.id, "Member left organization");
    Ok(())
}

/// Grant or revoke the admin and driver capabilities of a member
pub async fn update_member_role(
    state: &AppState,
    actor: &User,
    org_id: &str,
    target_user_id: &str,
    change: UpdateMemberRoleRequest,
) -> ServiceResult<OrganizationMemberWithUser> {
    if change.is_admin.is_none() && change.is_driver.is_none() {
        return Err(ServiceError::validation(
            "is_admin",
            "Provide is_admin or is_driver",
        ));
    }

    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    find(&mut tx, org_id).await?;

    let target = membership(&mut tx, org_id, target_user_id)
        .await?
        .ok_or_else(|| ServiceError::NotAMember("User is not a member of this organization".into()))?;
    let actor_caps = membership(&mut tx, org_id, &actor.id)
        .await?
        .map(|m| Capabilities::from(&m))
        .unwrap_or_default();

    capabilities::authorize_role_change(actor_caps, Capabilities::from(&target), &change)?;

    let is_admin = change.is_admin.unwrap_or(target.is_admin);
    let is_driver = change.is_driver.unwrap_or(target.is_driver);
    sqlx::query("UPDATE organization_members SET is_admin = ?, is_driver = ? WHERE id = ?")
        .bind(is_admin)
        .bind(is_driver)
        .bind(&target.id)
        .execute(&mut *tx)
        .await?;

    let updated = member_with_user(&mut tx, org_id, target_user_id).await?;
    tx.commit().await?;

    info!(
        organization_id = %org_id,
        user_id = %target_user_id,
        is_admin,
        is_driver,
        "Member capabilities updated"
    );
    Ok(updated)
}

/// Add an existing user without an access code
pub async fn add_member(
    state: &AppState,
    actor: &User,
    org_id: &str,
    req: AddMemberRequest,
) -> ServiceResult<OrganizationMemberWithUser> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    find(&mut tx, org_id).await?;

    let actor_caps = membership(&mut tx, org_id, &actor.id)
        .await?
        .map(|m| Capabilities::from(&m))
        .unwrap_or_default();
    capabilities::authorize_addition(actor_caps, &req)?;

    let known: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&req.user_id)
        .fetch_optional(&mut *tx)
        .await?;
    if known.is_none() {
        return Err(ServiceError::not_found("User not found"));
    }
    if membership(&mut tx, org_id, &req.user_id).await?.is_some() {
        return Err(ServiceError::AlreadyMember(
            "User is already a member of this organization".to_string(),
        ));
    }

    let is_admin = req.is_admin.unwrap_or(false);
    let is_driver = req.is_driver.unwrap_or(false);
    sqlx::query(
        "INSERT INTO organization_members (id, organization_id, user_id, is_admin, is_driver, joined_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(org_id)
    .bind(&req.user_id)
    .bind(is_admin)
    .bind(is_driver)
    .bind(now_timestamp())
    .execute(&mut *tx)
    .await?;

    let added = member_with_user(&mut tx, org_id, &req.user_id).await?;
    tx.commit().await?;

    info!(
        organization_id = %org_id,
        user_id = %req.user_id,
        added_by = %actor.id,
        is_admin,
        is_driver,
        "Member added"
    );
    Ok(added)
}

pub async fn remove_member(
    state: &AppState,
    actor: &User,
    org_id: &str,
    target_user_id: &str,
) -> ServiceResult<()> {
    let _guard = state.ride_writes.lock().await;
    let mut tx = state.db.begin().await?;
    find(&mut tx, org_id).await?;

    let target = membership(&mut tx, org_id, target_user_id)
        .await?
        .ok_or_else(|| ServiceError::NotAMember("User is not a member of this organization".into()))?;
    let actor_caps = membership(&mut tx, org_id, &actor.id)
        .await?
        .map(|m| Capabilities::from(&m))
        .unwrap_or_default();

    capabilities::authorize_removal(actor_caps, Capabilities::from(&target))?;

    sqlx::query("DELETE FROM organization_members WHERE id = ?")
        .bind(&target.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(organization_id = %org_id, user_id = %target_user_id, removed_by = %actor.id, "Member removed");
    Ok(())
}
