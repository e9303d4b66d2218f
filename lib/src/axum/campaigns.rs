use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json,
};
use http::StatusCode;
use uuid::Uuid;

use crate::campaign::{self, Campaign, CampaignStatus, DispatchState, NewCampaign, Summary};
use crate::list::ReadRetry;
use crate::{routes, tracking, Database, Error, ErrorKind, Result};

use super::{ConfigExt, DbExt, DispatcherExt, Items, JsonBody, Owner, RendererExt, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::CAMPAIGNS, get(all).post(create))
        .route(routes::CAMPAIGN, get(one).delete(remove))
        .route(routes::CAMPAIGN_METRICS, get(metrics))
        .route(routes::CAMPAIGN_RECIPIENTS, get(recipients))
        .route(routes::CAMPAIGN_DISPATCH, post(dispatch))
}

pub async fn all(owner: Owner, Extension(db): DbExt) -> Result<impl IntoResponse> {
    Ok(Json(Items::from(campaign::all(&db, owner.id())?)))
}

pub async fn one(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(db.get::<Campaign>(owner.id(), id)?))
}

/// Creates the campaign and, unless dispatch is configured to be deferred,
/// dispatches it right away.
///
/// A failed dispatch doesn't fail the request. The returned campaign carries
/// the `error` dispatch state instead.
pub async fn create(
    owner: Owner,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
    Extension(renderer): RendererExt,
    Extension(dispatcher): DispatcherExt,
    JsonBody(new): JsonBody<NewCampaign>,
) -> Result<impl IntoResponse> {
    let retry = ReadRetry::from(&config.storage);
    let campaign = campaign::create(&db, &renderer, retry, owner.id(), &new).await?;

    if !dispatcher.config().inline {
        return Ok((StatusCode::CREATED, Json(campaign)));
    }

    let campaign = match dispatcher
        .dispatch_with(owner.id(), campaign.id, &new.attachments())
        .await
    {
        Ok(campaign) => campaign,
        Err(e) => capture_dispatch_error(&db, owner.id(), campaign, e)?,
    };

    Ok((StatusCode::CREATED, Json(campaign)))
}

fn capture_dispatch_error(db: &Database, owner: &str, campaign: Campaign, e: Error) -> Result<Campaign> {
    tracing::error!(%owner, campaign = %campaign.id, "dispatch failed: {}", e);
    let message = e.kind.to_string();
    let updated = db.update::<Campaign>(owner, campaign.id, |c| {
        c.dispatch_state = DispatchState::Error;
        c.dispatch_error = Some(message.clone());
        c.status = CampaignStatus::Failed;
        true
    })?;
    Ok(updated.unwrap_or(campaign))
}

/// Re-runs dispatch for a campaign left queued or failed.
pub async fn dispatch(
    owner: Owner,
    Extension(dispatcher): DispatcherExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(dispatcher.dispatch_with(owner.id(), id, &[]).await?))
}

pub async fn remove(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !campaign::delete(&db, owner.id(), id)? {
        return Err(ErrorKind::NotFound(format!("campaign {}", id)).into());
    }
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

pub async fn metrics(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(tracking::compute_metrics(&db, owner.id(), id)?))
}

#[derive(Serialize)]
struct RecipientsResponse {
    items: Vec<campaign::Recipient>,
    summary: Summary,
}

pub async fn recipients(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    db.get::<Campaign>(owner.id(), id)?;
    let items = campaign::recipients(&db, owner.id(), id)?;
    let summary = Summary::tally(&items);
    Ok(Json(RecipientsResponse { items, summary }))
}
