use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{Credentials, Gateway},
    error::{RoomError, RoomResult},
    AppResult,
};

use super::{
    model::{RoomDraft, RoomKind},
    registry::RoomRegistry,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomRequest {
    kind: RoomKind,
    time_limit: Option<u32>,
    title: Option<String>,
    question: Option<String>,
    #[serde(default)]
    options: Vec<String>,
}

impl NewRoomRequest {
    fn into_draft(self) -> RoomResult<RoomDraft> {
        let Self { kind, time_limit, title, question, options } = self;
        Ok(match kind {
            RoomKind::WordCloud => RoomDraft::WordCloud { title, time_limit },
            RoomKind::Qna => RoomDraft::Qna { title, time_limit },
            RoomKind::Poll => RoomDraft::Poll {
                question: question.ok_or_else(|| RoomError::validation("a poll needs a question"))?,
                options,
                time_limit,
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewRoomResponse {
    id: Uuid,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(gateway): State<Gateway>,
    State(registry): State<RoomRegistry>,
    credentials: Credentials,

    Json(request): Json<NewRoomRequest>,
) -> AppResult<(StatusCode, Json<NewRoomResponse>)> {
    let host = gateway.resolve_request(&credentials)?;
    let id = registry.create(host, request.into_draft()?).await?;

    Ok((StatusCode::CREATED, Json(NewRoomResponse { id })))
}
