//! Organization endpoints: membership by access code and role management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    AddMemberRequest, CreateOrganizationRequest, JoinOrganizationRequest, OrganizationDetail,
    OrganizationDriver, OrganizationMemberWithUser, OrganizationRidesQuery, OrganizationSummary,
    RideResponse, UpdateMemberRoleRequest, UpdateOrganizationRequest, User,
};
use crate::organization::service as orgs;
use crate::ride::service as rides;
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_comment, validate_organization_name, validate_uuid};

fn validate_create_request(req: &CreateOrganizationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_organization_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_comment(req.description.as_deref()) {
        errors.add("description", e);
    }

    errors.finish()
}

fn validate_update_request(req: &UpdateOrganizationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(ref name) = req.name {
        if let Err(e) = validate_organization_name(name) {
            errors.add("name", e);
        }
    }
    if let Err(e) = validate_comment(req.description.as_deref()) {
        errors.add("description", e);
    }

    errors.finish()
}

pub async fn create_organization(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationSummary>), ApiError> {
    validate_create_request(&req)?;
    let org = orgs::create(&state, &user, req).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// Organizations the caller belongs to
pub async fn list_organizations(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<OrganizationSummary>>, ApiError> {
    Ok(Json(orgs::list_for_user(&state, &user).await?))
}

pub async fn join_organization(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<JoinOrganizationRequest>,
) -> Result<Json<OrganizationSummary>, ApiError> {
    Ok(Json(orgs::join(&state, &user, &req.access_code).await?))
}

pub async fn get_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<OrganizationDetail>, ApiError> {
    Ok(Json(orgs::get(&state, &user, &id).await?))
}

pub async fn update_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<OrganizationSummary>, ApiError> {
    validate_update_request(&req)?;
    Ok(Json(orgs::update(&state, &user, &id, req).await?))
}

pub async fn delete_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    orgs::delete(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<Vec<OrganizationMemberWithUser>>, ApiError> {
    Ok(Json(orgs::members(&state, &user, &id).await?))
}

/// An admin adds an existing user without the access code
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Json(req): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<OrganizationMemberWithUser>), ApiError> {
    validate_uuid(&req.user_id, "user_id").map_err(|e| ApiError::validation_field("user_id", e))?;
    let member = orgs::add_member(&state, &user, &id, req).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn list_drivers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<Json<Vec<OrganizationDriver>>, ApiError> {
    Ok(Json(orgs::drivers(&state, &user, &id).await?))
}

pub async fn leave_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
) -> Result<StatusCode, ApiError> {
    orgs::leave(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn organization_rides(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: User,
    Query(query): Query<OrganizationRidesQuery>,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let rides = rides::organization_rides(&state, &user, &id, query.status.as_deref()).await?;
    Ok(Json(rides.into_iter().map(RideResponse::from).collect()))
}

pub async fn update_member_role(
    State(state): State<Arc<AppState>>,
    Path((org_id, user_id)): Path<(String, String)>,
    user: User,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<OrganizationMemberWithUser>, ApiError> {
    let member = orgs::update_member_role(&state, &user, &org_id, &user_id, req).await?;
    Ok(Json(member))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((org_id, user_id)): Path<(String, String)>,
    user: User,
) -> Result<StatusCode, ApiError> {
    orgs::remove_member(&state, &user, &org_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
