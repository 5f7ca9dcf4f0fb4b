/// Organization endpoints
///
/// # Endpoints
///
/// Own organization (admins and managers):
/// - `GET   /api/v1/organization`
/// - `PATCH /api/v1/organization` (admin)
/// - `GET   /api/v1/organization/stats`
/// - `PATCH /api/v1/organization/settings/manager`
/// - `POST  /api/v1/organization/logo` (multipart, field `logo`)
///
/// Administration:
/// - `GET    /api/v1/organization/admin/list` (super admin)
/// - `POST   /api/v1/organization/admin/create` (super admin)
/// - `GET    /api/v1/organization/admin/:organizationId`
/// - `PATCH  /api/v1/organization/admin/:organizationId`
/// - `DELETE /api/v1/organization/admin/:organizationId`
/// - `GET    /api/v1/organization/admin/:organizationId/quota`
///
/// Admins that belong to an organization can only reach their own through
/// the `:organizationId` routes; anything else is reported as missing.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    response::{ApiResponse, Created},
};
use axum::{
    extract::{Multipart, Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use coachhub_shared::{
    auth::{
        authorization::{require_organization, require_role, OrganizationScope, STAFF},
        middleware::AuthContext,
    },
    models::{
        activity::{Activity, ActivityType, NewActivity},
        organization::{
            is_valid_slug, merge_manager_settings, normalize_slug, Contact, CreateOrganization,
            Organization, OrganizationFilter, SubscriptionPlan, SubscriptionStatus,
            UpdateOrganization,
        },
        page_count, page_offset,
        user::UserRole,
    },
    quota::{OrganizationQuotaUsage, SeatCounts},
    reports::OrganizationStats,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;
use validator::Validate;

/// Largest accepted logo
pub const MAX_LOGO_BYTES: usize = 5 * 1024 * 1024;

const ADMIN_LIST_DEFAULT_LIMIT: i64 = 50;
const ADMIN_LIST_MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub slug: String,

    pub subscription_plan: Option<SubscriptionPlan>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_users: Option<i32>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_coaches: Option<i32>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_entrepreneurs: Option<i32>,

    #[validate(email(message = "Invalid email format"))]
    pub billing_email: Option<String>,

    #[serde(default)]
    pub contact: Contact,

    pub settings: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    pub slug: Option<String>,

    pub is_active: Option<bool>,

    pub subscription_plan: Option<SubscriptionPlan>,

    pub subscription_status: Option<SubscriptionStatus>,

    pub subscription_renewal_at: Option<DateTime<Utc>>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_users: Option<i32>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_coaches: Option<i32>,

    #[validate(range(min = 0, message = "Must not be negative"))]
    pub max_entrepreneurs: Option<i32>,

    #[validate(email(message = "Invalid email format"))]
    pub billing_email: Option<String>,

    pub contact: Option<Contact>,

    pub settings: Option<JsonValue>,

    pub preferences: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub is_active: Option<bool>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrganizationPage {
    pub success: bool,
    pub data: Vec<Organization>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub quota_usage: OrganizationQuotaUsage,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
}

/// Normalizes and checks a requested slug.
fn checked_slug(raw: &str) -> ApiResult<String> {
    let slug = normalize_slug(raw);
    if !is_valid_slug(&slug) {
        return Err(ApiError::invalid_field(
            "slug",
            "Slug must be 2-100 characters of a-z, 0-9 and inner hyphens",
        ));
    }
    Ok(slug)
}

/// File extension for an accepted logo content type
pub fn logo_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

async fn load_organization(state: &AppState, id: Uuid) -> ApiResult<Organization> {
    Organization::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))
}

/// Loads an organization the caller may administer.
async fn administered_organization(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
) -> ApiResult<Organization> {
    require_role(auth, &[UserRole::Admin])?;

    if !OrganizationScope::of(auth).contains(Some(id)) {
        return Err(ApiError::NotFound("Organization not found".to_string()));
    }

    load_organization(state, id).await
}

fn require_super_admin(auth: &AuthContext) -> ApiResult<()> {
    require_role(auth, &[UserRole::Admin])?;
    if !auth.is_super_admin() {
        return Err(ApiError::Forbidden(
            "Platform administrator access required".to_string(),
        ));
    }
    Ok(())
}

async fn apply_update(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    req: UpdateOrganizationRequest,
) -> ApiResult<Organization> {
    req.validate()?;

    let slug = match req.slug.as_deref() {
        Some(raw) => {
            let slug = checked_slug(raw)?;
            if Organization::slug_taken(&state.db, &slug, Some(id)).await? {
                return Err(ApiError::Conflict(
                    "Organization slug already in use".to_string(),
                ));
            }
            Some(slug)
        }
        None => None,
    };

    let changed: Vec<&str> = [
        ("name", req.name.is_some()),
        ("slug", slug.is_some()),
        ("isActive", req.is_active.is_some()),
        ("subscriptionPlan", req.subscription_plan.is_some()),
        ("subscriptionStatus", req.subscription_status.is_some()),
        ("maxUsers", req.max_users.is_some()),
        ("maxCoaches", req.max_coaches.is_some()),
        ("maxEntrepreneurs", req.max_entrepreneurs.is_some()),
        ("billingEmail", req.billing_email.is_some()),
        ("contact", req.contact.is_some()),
        ("settings", req.settings.is_some()),
        ("preferences", req.preferences.is_some()),
    ]
    .into_iter()
    .filter_map(|(field, present)| present.then_some(field))
    .collect();

    let organization = Organization::update(
        &state.db,
        id,
        UpdateOrganization {
            name: req.name,
            slug,
            is_active: req.is_active,
            subscription_plan: req.subscription_plan,
            subscription_status: req.subscription_status,
            subscription_renewal_at: req.subscription_renewal_at,
            max_users: req.max_users,
            max_coaches: req.max_coaches,
            max_entrepreneurs: req.max_entrepreneurs,
            billing_email: req.billing_email,
            contact: req.contact,
            settings: req.settings,
            preferences: req.preferences,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::OrganizationUpdated,
            format!("Organization {} updated", organization.name),
        )
        .organization(Some(organization.id))
        .actor(auth.user_id)
        .entity("organization", organization.id)
        .metadata(json!({ "fields": changed })),
    )
    .await;

    Ok(organization)
}

pub async fn get_own(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<Organization>>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;

    Ok(ApiResponse::ok(load_organization(&state, organization_id).await?))
}

pub async fn update_own(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateOrganizationRequest>,
) -> ApiResult<Json<ApiResponse<Organization>>> {
    require_role(&auth, &[UserRole::Admin])?;
    let organization_id = require_organization(&auth)?;

    let organization = apply_update(&state, &auth, organization_id, req).await?;
    Ok(ApiResponse::ok(organization))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<OrganizationStats>>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;

    let organization = load_organization(&state, organization_id).await?;
    let stats = OrganizationStats::load(&state.db, &organization).await?;

    Ok(ApiResponse::ok(stats))
}

/// Deep-merges the manager-editable settings keys
pub async fn update_manager_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(patch): Json<JsonValue>,
) -> ApiResult<Json<ApiResponse<JsonValue>>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;

    if !patch.is_object() {
        return Err(ApiError::invalid_field("settings", "Expected a JSON object"));
    }

    let organization = load_organization(&state, organization_id).await?;
    let merged = merge_manager_settings(&organization.settings, &patch);

    let updated = Organization::set_settings(&state.db, organization_id, &merged)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    tracing::debug!(organization_id = %organization_id, "Manager settings updated");

    Ok(ApiResponse::ok(updated.settings))
}

pub async fn upload_logo(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> ApiResult<Created<Organization>> {
    require_role(&auth, STAFF)?;
    let organization_id = require_organization(&auth)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("logo") {
            continue;
        }

        let extension = field
            .content_type()
            .and_then(logo_extension)
            .ok_or_else(|| {
                ApiError::BadRequest("Logo must be a PNG, JPEG, WEBP or SVG image".to_string())
            })?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read logo: {}", e)))?;

        upload = Some((extension, bytes));
        break;
    }

    let (extension, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing `logo` file field".to_string()))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Logo file is empty".to_string()));
    }
    if bytes.len() > MAX_LOGO_BYTES {
        return Err(ApiError::BadRequest("Logo must be at most 5 MB".to_string()));
    }

    let relative = format!("organization/{}-{}.{}", organization_id, Uuid::new_v4(), extension);
    let target = state.config.api.upload_dir.join(&relative);

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ApiError::InternalError(format!("Failed to create upload directory: {}", e))
        })?;
    }
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store logo: {}", e)))?;

    let organization = Organization::set_logo_path(&state.db, organization_id, &relative)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    tracing::info!(organization_id = %organization_id, size = bytes.len(), "Organization logo uploaded");

    Ok(ApiResponse::created(organization))
}

pub async fn admin_list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AdminListQuery>,
) -> ApiResult<Json<OrganizationPage>> {
    require_super_admin(&auth)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(ADMIN_LIST_DEFAULT_LIMIT)
        .clamp(1, ADMIN_LIST_MAX_LIMIT);

    let filter = OrganizationFilter {
        is_active: query.is_active,
        subscription_plan: query.subscription_plan,
        subscription_status: query.subscription_status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let data = Organization::list(&state.db, &filter, limit, page_offset(page, limit)).await?;
    let total = Organization::count(&state.db, &filter).await?;

    Ok(Json(OrganizationPage {
        success: true,
        data,
        total,
        page,
        pages: page_count(total, limit),
    }))
}

pub async fn admin_create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateOrganizationRequest>,
) -> ApiResult<Created<Organization>> {
    require_super_admin(&auth)?;
    req.validate()?;

    let slug = checked_slug(&req.slug)?;
    if Organization::slug_taken(&state.db, &slug, None).await? {
        return Err(ApiError::Conflict("Organization slug already in use".to_string()));
    }

    let organization = Organization::create(
        &state.db,
        CreateOrganization {
            name: req.name,
            slug,
            subscription_plan: req.subscription_plan.unwrap_or(SubscriptionPlan::Free),
            max_users: req.max_users,
            max_coaches: req.max_coaches,
            max_entrepreneurs: req.max_entrepreneurs,
            billing_email: req.billing_email,
            contact: req.contact,
            settings: req.settings,
        },
    )
    .await?;

    tracing::info!(organization_id = %organization.id, slug = %organization.slug, "Organization created");

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::OrganizationCreated,
            format!("Organization {} created", organization.name),
        )
        .organization(Some(organization.id))
        .actor(auth.user_id)
        .entity("organization", organization.id)
        .metadata(json!({ "plan": organization.subscription_plan.as_str() })),
    )
    .await;

    Ok(ApiResponse::created(organization))
}

pub async fn admin_get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(organization_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Organization>>> {
    let organization = administered_organization(&state, &auth, organization_id).await?;
    Ok(ApiResponse::ok(organization))
}

pub async fn admin_update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(organization_id): Path<Uuid>,
    Json(req): Json<UpdateOrganizationRequest>,
) -> ApiResult<Json<ApiResponse<Organization>>> {
    administered_organization(&state, &auth, organization_id).await?;

    let organization = apply_update(&state, &auth, organization_id, req).await?;
    Ok(ApiResponse::ok(organization))
}

/// Soft delete
pub async fn admin_deactivate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(organization_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Option<()>>>> {
    let organization = administered_organization(&state, &auth, organization_id).await?;

    if !Organization::deactivate(&state.db, organization_id).await? {
        return Err(ApiError::NotFound("Organization not found".to_string()));
    }

    tracing::info!(organization_id = %organization_id, "Organization deactivated");

    Activity::log(
        &state.db,
        NewActivity::new(
            ActivityType::OrganizationUpdated,
            format!("Organization {} deactivated", organization.name),
        )
        .organization(Some(organization_id))
        .actor(auth.user_id)
        .entity("organization", organization_id)
        .metadata(json!({ "isActive": false })),
    )
    .await;

    Ok(crate::response::message("Organization deactivated"))
}

pub async fn admin_quota(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(organization_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<QuotaResponse>>> {
    let organization = administered_organization(&state, &auth, organization_id).await?;
    let seats = SeatCounts::load(&state.db, organization_id).await?;

    Ok(ApiResponse::ok(QuotaResponse {
        quota_usage: seats.usage(&organization),
        subscription_plan: organization.subscription_plan,
        subscription_status: organization.subscription_status,
    }))
}
