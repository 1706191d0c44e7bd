use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use feedmail_db::FeedOrder;
use feedmail_types::api::{
    DeleteFeedRequest, DeleteFeedResponse, GenericIdResponse, ListFeedsRequest, ListFeedsResponse,
    UpdatedFeedResponse,
};
use feedmail_types::{ErrorCode, Feed, clamp_frequency};

use crate::error::RequestError;
use crate::locale::MessageKey;
use crate::state::{GatewayState, SessionContext};

fn validate_url(url: &str, ctx: &SessionContext) -> Result<String, RequestError> {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    let has_host = ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len());
    if has_host {
        Ok(url.to_string())
    } else {
        Err(RequestError::localized(
            ErrorCode::InvalidInputs,
            &ctx.localizer,
            MessageKey::InvalidFeedUrl,
        ))
    }
}

pub async fn list_feeds(
    state: &GatewayState,
    ctx: &SessionContext,
    req: ListFeedsRequest,
) -> Result<ListFeedsResponse, RequestError> {
    let owner = ctx.user_id;
    let order = FeedOrder::from_code(req.sort);
    let feeds = state
        .db
        .call(move |db| db.feeds_by_owner(owner, order))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;

    Ok(ListFeedsResponse {
        count: feeds.len() as u64,
        feeds,
    })
}

/// Store a new feed owned by the session user. The client's id, owner,
/// timestamps and `last_fetched` are ignored.
pub async fn add_feed(
    state: &GatewayState,
    ctx: &SessionContext,
    req: Feed,
) -> Result<GenericIdResponse, RequestError> {
    let url = validate_url(&req.url, ctx)?;
    let now = Utc::now();
    let feed = Feed {
        created_at: now,
        updated_at: now,
        id: Uuid::new_v4(),
        owner: ctx.user_id,
        name: req.name.trim().to_string(),
        url,
        frequency: clamp_frequency(req.frequency),
        last_fetched: DateTime::UNIX_EPOCH,
    };

    let id = feed.id;
    state
        .db
        .call(move |db| db.insert_feed(&feed))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;

    info!("User {} added feed {}", ctx.user_id, id);
    Ok(GenericIdResponse { ok: true, id })
}

/// Replace name, URL and frequency of a feed the session user owns.
/// Anyone else's feed, or a missing one, modifies nothing.
pub async fn edit_feed(
    state: &GatewayState,
    ctx: &SessionContext,
    req: Feed,
) -> Result<UpdatedFeedResponse, RequestError> {
    let url = validate_url(&req.url, ctx)?;
    let owner = ctx.user_id;
    let id = req.id;
    let name = req.name.trim().to_string();
    let frequency = clamp_frequency(req.frequency);

    let modified = state
        .db
        .call(move |db| db.update_feed(id, owner, &name, &url, frequency, Utc::now()))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;

    Ok(UpdatedFeedResponse {
        modified_count: modified as u64,
    })
}

pub async fn delete_feed(
    state: &GatewayState,
    ctx: &SessionContext,
    req: DeleteFeedRequest,
) -> Result<DeleteFeedResponse, RequestError> {
    let owner = ctx.user_id;
    let id = req.id;
    let deleted = state
        .db
        .call(move |db| db.delete_feed(id, owner))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;

    if deleted > 0 {
        info!("User {} deleted feed {}", owner, id);
    }
    Ok(DeleteFeedResponse {
        deleted_count: deleted as i64,
    })
}
