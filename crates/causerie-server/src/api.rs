use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{request::Parts, Method},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use causerie_engine::{Engine, HistoryCursor, InboxEntry, MessageDraft, ReadMark, SettingsPatch};
use causerie_engine::{AckOutcome, MessageReceipts};
use causerie_shared::constants::{ACTOR_HEADER, APP_NAME};
use causerie_shared::permissions::{Capabilities, PermissionOverrides};
use causerie_shared::{
    Conversation, ConversationId, ConversationKind, ConversationSettings, MediaRef,
    MemberPermission, Message, MessageContent, MessageId, MutePolicy, MuteSetting, Privacy, Role,
    UserId,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

type ApiResult<T> = Result<Json<T>, ServerError>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

/// The authenticated user, taken from the header set by the auth layer in
/// front of this service.
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<UserId>().ok())
            .map(Actor)
            .ok_or(ServerError::Unauthenticated)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/conversations", get(inbox).post(create_group))
        .route("/conversations/direct", post(open_direct))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/:id/settings", patch(update_settings))
        .route("/conversations/:id/join", post(join_public))
        .route("/conversations/:id/members", post(add_member))
        .route(
            "/conversations/:id/members/:user_id",
            delete(remove_member),
        )
        .route("/conversations/:id/members/:user_id/role", put(set_role))
        .route(
            "/conversations/:id/members/:user_id/permissions",
            put(set_permission),
        )
        .route("/conversations/:id/capabilities", get(capabilities))
        .route(
            "/conversations/:id/messages",
            get(history).post(post_message),
        )
        .route("/conversations/:id/read-state", get(read_state))
        .route("/conversations/:id/unread", get(unread_count))
        .route("/conversations/:id/typing", post(typing))
        .route("/conversations/:id/presence", get(presence_stream))
        .route("/conversations/:id/online", get(online_users))
        .route("/conversations/:id/mute", get(get_mute).put(set_mute))
        .route(
            "/messages/:id",
            get(get_message).patch(edit_message).delete(delete_message),
        )
        .route("/messages/:id/delivered", post(acknowledge_delivered))
        .route("/messages/:id/seen", post(acknowledge_seen))
        .route("/messages/:id/receipts", get(receipts))
        .route("/messages/:id/media", get(download_media))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request and response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: &'static str,
    version: &'static str,
    max_page_size: usize,
    max_message_len: usize,
    push_enabled: bool,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    kind: ConversationKind,
    name: Option<String>,
    #[serde(default)]
    members: Vec<UserId>,
    #[serde(default)]
    settings: ConversationSettings,
}

#[derive(Deserialize)]
struct DirectRequest {
    peer: UserId,
}

#[derive(Deserialize)]
struct SettingsRequest {
    privacy: Option<Privacy>,
    comments_enabled: Option<bool>,
    default_mute: Option<MutePolicy>,
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

#[derive(Deserialize)]
struct PostMessageRequest {
    text: Option<String>,
    media: Option<MediaRef>,
    replied_to: Option<MessageId>,
    #[serde(default)]
    mentions: Vec<UserId>,
    #[serde(default)]
    forwarded: bool,
}

impl From<PostMessageRequest> for MessageDraft {
    fn from(req: PostMessageRequest) -> Self {
        MessageDraft {
            content: MessageContent {
                text: req.text,
                media: req.media,
            },
            replied_to: req.replied_to,
            mentions: req.mentions,
            forwarded: req.forwarded,
        }
    }
}

/// `after` and `before` are exclusive sequence bounds; neither means the
/// latest page.
#[derive(Deserialize)]
struct HistoryQuery {
    after: Option<u64>,
    before: Option<u64>,
    limit: Option<usize>,
}

impl HistoryQuery {
    fn cursor(&self) -> Result<HistoryCursor, ServerError> {
        match (self.after, self.before) {
            (Some(_), Some(_)) => Err(ServerError::BadRequest(
                "`after` and `before` are mutually exclusive".into(),
            )),
            (Some(after), None) => Ok(HistoryCursor::After(after)),
            (None, Some(before)) => Ok(HistoryCursor::Before(before)),
            (None, None) => Ok(HistoryCursor::Latest),
        }
    }
}

#[derive(Deserialize)]
struct TypingRequest {
    is_typing: bool,
}

#[derive(Serialize)]
struct TypingResponse {
    delivered: usize,
}

#[derive(Deserialize)]
struct MuteRequest {
    muted: bool,
    duration_minutes: Option<u32>,
}

#[derive(Serialize)]
struct UnreadResponse {
    conversation_id: ConversationId,
    unread: u64,
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        max_page_size: state.config.max_page_size,
        max_message_len: state.config.max_message_len,
        push_enabled: state.config.push_webhook_url.is_some(),
    })
}

async fn inbox(State(state): State<AppState>, Actor(actor): Actor) -> Json<Vec<InboxEntry>> {
    Json(state.engine.inbox(actor).await)
}

async fn create_group(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<Conversation> {
    let conversation = state
        .engine
        .create_group(actor, req.kind, req.name, &req.members, req.settings)
        .await?;
    info!(
        conversation = %conversation.id,
        kind = ?conversation.kind,
        members = conversation.members.len(),
        "Conversation created via API"
    );
    Ok(Json(conversation))
}

async fn open_direct(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<DirectRequest>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.get_or_create_direct(actor, req.peer).await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.conversation(id, actor).await?))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<serde_json::Value> {
    state.engine.delete_conversation(actor, id).await?;
    info!(conversation = %id, actor = %actor.short(), "Conversation deleted via API");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn update_settings(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(req): Json<SettingsRequest>,
) -> ApiResult<Conversation> {
    let patch = SettingsPatch {
        privacy: req.privacy,
        comments_enabled: req.comments_enabled,
        default_mute: req.default_mute,
    };
    Ok(Json(state.engine.update_settings(actor, id, patch).await?))
}

async fn join_public(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.join_public(actor, id).await?))
}

async fn add_member(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.add_member(actor, id, req.user_id).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path((id, user_id)): Path<(ConversationId, UserId)>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.remove_member(actor, id, user_id).await?))
}

async fn set_role(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path((id, user_id)): Path<(ConversationId, UserId)>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Conversation> {
    Ok(Json(state.engine.set_role(actor, id, user_id, req.role).await?))
}

async fn set_permission(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path((id, user_id)): Path<(ConversationId, UserId)>,
    Json(patch): Json<PermissionOverrides>,
) -> ApiResult<MemberPermission> {
    Ok(Json(
        state.engine.set_permission(actor, id, user_id, patch).await?,
    ))
}

async fn capabilities(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Capabilities> {
    Ok(Json(state.engine.resolve(id, actor).await?))
}

async fn history(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Message>> {
    let cursor = query.cursor()?;
    Ok(Json(
        state.engine.history(id, actor, cursor, query.limit).await?,
    ))
}

async fn post_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<Message> {
    let message = state.engine.post(id, actor, req.into()).await?;
    debug!(
        conversation = %id,
        sequence = message.sequence,
        author = %actor.short(),
        "Message posted via API"
    );
    Ok(Json(message))
}

async fn read_state(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Vec<ReadMark>> {
    Ok(Json(state.engine.read_state(id, actor).await?))
}

async fn unread_count(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<UnreadResponse> {
    let unread = state.engine.unread_count(id, actor).await?;
    Ok(Json(UnreadResponse {
        conversation_id: id,
        unread,
    }))
}

async fn typing(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(req): Json<TypingRequest>,
) -> ApiResult<TypingResponse> {
    let delivered = state.engine.publish_typing(id, actor, req.is_typing).await?;
    Ok(Json(TypingResponse { delivered }))
}

/// Server-sent stream of typing and online events. The subscription lives
/// as long as the response stream; closing the connection unsubscribes.
async fn presence_stream(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let subscription = state.engine.subscribe_presence(id, actor).await?;
    info!(conversation = %id, user = %actor.short(), "Presence stream opened");

    let events = stream::unfold(subscription, |mut subscription| async move {
        loop {
            let event = subscription.recv().await?;
            match Event::default().json_data(&event) {
                Ok(sse) => return Some((Ok(sse), subscription)),
                Err(e) => debug!(error = %e, "Skipping unencodable presence event"),
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn online_users(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Vec<UserId>> {
    Ok(Json(state.engine.online_users(id, actor).await?))
}

async fn get_mute(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<MuteSetting> {
    Ok(Json(state.engine.mute_setting(actor, id).await?))
}

async fn set_mute(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(req): Json<MuteRequest>,
) -> ApiResult<MuteSetting> {
    Ok(Json(
        state
            .engine
            .set_mute(actor, id, req.muted, req.duration_minutes)
            .await?,
    ))
}

async fn get_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<Message> {
    Ok(Json(state.engine.message(id, actor).await?))
}

async fn edit_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
    Json(content): Json<MessageContent>,
) -> ApiResult<Message> {
    Ok(Json(state.engine.edit_message(id, actor, content).await?))
}

async fn delete_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<Message> {
    Ok(Json(state.engine.delete_message(id, actor).await?))
}

async fn acknowledge_delivered(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<AckOutcome> {
    Ok(Json(state.engine.acknowledge_delivered(id, actor).await?))
}

async fn acknowledge_seen(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<AckOutcome> {
    Ok(Json(state.engine.acknowledge_seen(id, actor).await?))
}

async fn receipts(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<MessageReceipts> {
    Ok(Json(state.engine.receipts(id, actor).await?))
}

async fn download_media(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> ApiResult<MediaRef> {
    Ok(Json(state.engine.download_media(id, actor).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
