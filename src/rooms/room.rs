use axum::{debug_handler, extract::{Path, State}, Json};
use uuid::Uuid;

use crate::{
    auth::{Credentials, Gateway},
    AppResult,
};

use super::{
    model::{RoomSummary, Snapshot},
    registry::RoomRegistry,
};

/// Public snapshot of a room, as shown on result pages.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(registry): State<RoomRegistry>,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<Snapshot>> {
    Ok(Json(registry.snapshot(room_id, None).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn my_rooms(
    State(gateway): State<Gateway>,
    State(registry): State<RoomRegistry>,
    credentials: Credentials,
) -> AppResult<Json<Vec<RoomSummary>>> {
    let host = gateway.resolve_request(&credentials)?;
    Ok(Json(registry.list_by_host(&host).await?))
}
