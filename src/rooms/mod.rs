mod actor;
mod broadcast;
pub mod dispatch;
mod lifecycle;
mod model;
pub mod msg;
pub mod mutation;
mod new;
pub mod poll;
pub mod qna;
mod registry;
mod room;
pub mod wordcloud;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use actor::{RoomHandle, RoomSettings};
pub use broadcast::Outbox;
pub use dispatch::Connection;
pub use lifecycle::{Lifecycle, Transition};
pub use model::{
    ContentView, Room, RoomContent, RoomDraft, RoomKind, RoomRecord, RoomStatus, RoomSummary,
    Snapshot, ViewerState,
};
pub use msg::{ClientMessage, LifecycleEvent, ServerMessage};
pub use mutation::{Folded, Mutation};
pub use registry::RoomRegistry;
pub use ws::room_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(new::new_room))
        .route("/mine", get(room::my_rooms))
        .route("/{id}", get(room::room))
}
