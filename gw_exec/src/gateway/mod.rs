//! # Gateway
//!
//! Binds the gateway's components to HTTP routes and WebSocket upgrades.
//!
//! | Route                  | Method | Purpose                                        |
//! |------------------------|--------|------------------------------------------------|
//! | `/map/download`        | GET    | Map as PNG, `?map_name=`                       |
//! | `/map/list`            | GET    | Names of the stored maps                       |
//! | `/map/change`          | POST   | Switch navigation to a stored map              |
//! | `/voice/backup`        | GET    | Back up, waits for the outcome                 |
//! | `/robot/goal`          | POST   | Drive to `{x, y}`, waits for the outcome       |
//! | `/robot/position`      | GET    | Latest `{x, y}`                                |
//! | `/robot/cancel`        | GET    | Cancel the running task                        |
//! | `/robot/task`          | GET    | The running task, or `null`                    |
//! | `/robot/velocity`      | WS     | `{linear, angular}` velocity commands          |
//! | `/camera/stream`       | GET    | Live video of `?topic=`                        |
//! | `/mapping/stream`      | GET    | Live video of the map being built              |
//! | `/mapping/start`       | POST   | Launch mapping                                 |
//! | `/mapping/stop`        | POST   | Stop mapping                                   |
//! | `/mapping/save`        | POST   | Save the map being built as `{map_name}`       |

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod error;
pub use error::GatewayError;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use comms_if::api::{
    status, BackupQuery, GoalInput, MapList, MapNameInput, MapNameQuery, PositionOutput, Status,
    TaskInfo, TopicQuery,
};
use futures_util::{future, stream, SinkExt, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    cmd_relay::{CommandRelay, CommandSink, InboundMsg},
    ctx::GwContext,
    video_client::VideoSourceError,
    video_relay::{multipart_stream, FrameDemuxer, MULTIPART_CONTENT_TYPE},
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type GwResult<T> = Result<T, GatewayError>;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the gateway's router.
pub fn router(ctx: GwContext) -> Router {
    Router::new()
        .route("/map/download", get(download_map))
        .route("/map/list", get(list_maps))
        .route("/map/change", post(change_map))
        .route("/voice/backup", get(backup))
        .route("/robot/goal", post(set_goal))
        .route("/robot/position", get(position))
        .route("/robot/cancel", get(cancel))
        .route("/robot/task", get(current_task))
        .route("/robot/velocity", get(velocity_ws))
        .route("/camera/stream", get(camera_stream))
        .route("/mapping/stream", get(mapping_stream))
        .route("/mapping/start", post(start_mapping))
        .route("/mapping/stop", post(stop_mapping))
        .route("/mapping/save", post(save_map))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// ---- MAPS ----

async fn download_map(
    State(ctx): State<GwContext>,
    Query(query): Query<MapNameQuery>,
) -> GwResult<Response> {
    let name = query
        .map_name
        .unwrap_or_else(|| ctx.default_map.clone());

    let png = ctx.map_store.download(&name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}.png\"", name),
            ),
        ],
        png,
    )
        .into_response())
}

async fn list_maps(State(ctx): State<GwContext>) -> GwResult<Json<MapList>> {
    let maps = ctx.map_store.list().await?;
    Ok(Json(MapList { maps }))
}

async fn change_map(
    State(ctx): State<GwContext>,
    Json(input): Json<MapNameInput>,
) -> GwResult<Json<Status>> {
    ctx.mapping.change(&input.map_name).await?;
    Ok(Json(Status::new(status::CHANGED)))
}

// ---- NAVIGATION ----

async fn backup(
    State(ctx): State<GwContext>,
    Query(query): Query<BackupQuery>,
) -> GwResult<Json<Status>> {
    let outcome = ctx.orchestrator.request_backup(query).await?;
    Ok(Json(Status::new(outcome.status_str())))
}

async fn set_goal(
    State(ctx): State<GwContext>,
    Json(goal): Json<GoalInput>,
) -> GwResult<Json<Status>> {
    let outcome = ctx.orchestrator.request_goal(goal).await?;
    Ok(Json(Status::new(outcome.status_str())))
}

async fn position(State(ctx): State<GwContext>) -> Json<PositionOutput> {
    let pose = ctx.pose_cache.read();
    Json(PositionOutput {
        x: pose.x(),
        y: pose.y(),
    })
}

/// Fire and forget, the running task's own request reports when it has been canceled.
async fn cancel(State(ctx): State<GwContext>) -> Json<Status> {
    let orchestrator = ctx.orchestrator.clone();

    tokio::spawn(async move {
        if let Err(e) = orchestrator.cancel().await {
            warn!("Could not cancel the running task: {}", e);
        }
    });

    Json(Status::new(status::CANCELED))
}

async fn current_task(State(ctx): State<GwContext>) -> Json<Option<TaskInfo>> {
    Json(ctx.orchestrator.current_task())
}

// ---- VELOCITY ----

async fn velocity_ws(State(ctx): State<GwContext>, ws: WebSocketUpgrade) -> Response {
    let sink = ctx.cmd_sink.clone();
    let shutdown = ctx.shutdown.clone();
    ws.on_upgrade(move |socket| relay_commands(socket, sink, shutdown))
}

async fn relay_commands(
    socket: WebSocket,
    sink: Arc<dyn CommandSink>,
    shutdown: CancellationToken,
) {
    info!("Velocity connection opened");

    let (tx, rx) = socket.split();

    let inbound = rx.map(|msg| match msg {
        Ok(Message::Text(text)) => InboundMsg::Text(text.as_str().to_owned()),
        Ok(Message::Close(_)) => InboundMsg::Close,
        Ok(_) => InboundMsg::Other,
        Err(e) => InboundMsg::Error(e.to_string()),
    });
    let outbound = Box::pin(tx.with(|text: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
    }));

    let num_cmds = CommandRelay::new(sink, shutdown).run(inbound, outbound).await;

    info!("Velocity connection closed after {} commands", num_cmds);
}

// ---- VIDEO ----

async fn camera_stream(
    State(ctx): State<GwContext>,
    Query(query): Query<TopicQuery>,
) -> GwResult<Response> {
    relay_video(&ctx, &query.topic).await
}

async fn mapping_stream(State(ctx): State<GwContext>) -> GwResult<Response> {
    let topic = ctx.video.mapping_topic.clone();
    relay_video(&ctx, &topic).await
}

/// Open `topic` and relay it as a multipart response.
///
/// The response only starts once the first chunk has arrived, so that a silent upstream is
/// reported as unavailable rather than as an empty stream. The stream ends when the upstream does
/// or when the gateway shuts down.
async fn relay_video(ctx: &GwContext, topic: &str) -> GwResult<Response> {
    let mut upstream = ctx.video_source.open(topic)?;

    let timeout = Duration::from_millis(ctx.video.first_chunk_timeout_ms);
    let first = match tokio::time::timeout(timeout, upstream.next()).await {
        Ok(Some(Ok(chunk))) => chunk,
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) | Err(_) => return Err(VideoSourceError::NoData(topic.into()).into()),
    };

    info!("Relaying video stream {:?}", topic);

    let upstream = Box::pin(
        stream::once(future::ready(Ok(first)))
            .chain(upstream)
            .take_until(ctx.shutdown.clone().cancelled_owned()),
    );
    let parts = multipart_stream(upstream, FrameDemuxer::new(ctx.video.max_frame_bytes));

    Ok((
        [(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)],
        Body::from_stream(parts),
    )
        .into_response())
}

// ---- MAPPING ----

async fn start_mapping(State(ctx): State<GwContext>) -> GwResult<Json<Status>> {
    ctx.mapping.start().await?;
    Ok(Json(Status::new(status::STARTED)))
}

async fn stop_mapping(State(ctx): State<GwContext>) -> GwResult<Json<Status>> {
    let stopped = ctx.mapping.stop().await?;
    Ok(Json(Status::new(if stopped {
        status::STOPPED
    } else {
        status::NOT_RUNNING
    })))
}

async fn save_map(
    State(ctx): State<GwContext>,
    Json(input): Json<MapNameInput>,
) -> GwResult<Json<Status>> {
    ctx.mapping.save(&input.map_name).await?;
    Ok(Json(Status::new(status::SAVED)))
}
