//! Implements the client facing HTTP server.

use crate::store::SqliteHeap;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Form, Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use zcospace::{
    api::CreateParams,
    controller::{AdmissionController, Creation, Error},
    heap::HeapError,
    Attendant, Direction, ObjectId,
};

#[derive(Debug, Parser)]
pub(crate) struct ServerCli {
    #[arg(long, default_value = "0.0.0.0:4560")]
    http_addr: String,
}

#[derive(Clone)]
struct Daemon {
    controller: AdmissionController<SqliteHeap>,
    token: CancellationToken,
}

/// Sets up axum's router and starts listening for requests.
pub(crate) async fn main(
    cli: ServerCli,
    controller: AdmissionController<SqliteHeap>,
    token: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/{direction}", get(queue_get))
        .route("/{direction}/objects", post(object_create))
        .route("/objects/{id}", delete(object_release))
        .with_state(Daemon {
            controller,
            token: token.clone(),
        });

    log::info!("Listening on {}", cli.http_addr);
    let listener = TcpListener::bind(&cli.http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}

fn error_response(error: Error) -> (StatusCode, String) {
    let status = match &error {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Heap(HeapError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Heap(HeapError::OutOfRange { .. }) => StatusCode::BAD_REQUEST,
        Error::Heap(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{error}\n"))
}

/// Handler for `POST /{direction}/objects`<br>
/// Creates an object once its initial extent has been admitted, see [CreateParams].
///
/// With `wait` set the request blocks until space is granted or the daemon shuts down.
async fn object_create(
    State(daemon): State<Daemon>,
    Path(direction): Path<Direction>,
    Form(params): Form<CreateParams>,
) -> (StatusCode, String) {
    let source = match params.source() {
        Ok(source) => source,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e}\n")),
    };

    let attendant = params.wait.then(Attendant::new);
    let creation = daemon.controller.create_object(
        direction,
        source,
        params.priority(),
        attendant.as_ref(),
    );

    // Dropping an unfinished creation shreds its requisition.
    let result = tokio::select! {
        result = creation => result,
        _ = daemon.token.cancelled() => {
            log::warn!("{direction} creation abandoned on shutdown");
            return (StatusCode::SERVICE_UNAVAILABLE, "shutting down\n".to_string());
        }
    };

    match result {
        Ok(Creation::Created(id)) => (StatusCode::CREATED, format!("{id}\n")),
        Ok(Creation::NotCreated) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no object created\n".to_string(),
        ),
        Ok(Creation::Interrupted) => (StatusCode::CONFLICT, "creation interrupted\n".to_string()),
        Err(e) => error_response(e),
    }
}

/// Handler for `DELETE /objects/{id}`<br>
/// Destroys the object and lets waiting requesters use its space.
async fn object_release(
    State(daemon): State<Daemon>,
    Path(id): Path<ObjectId>,
) -> (StatusCode, String) {
    match daemon.controller.destroy_object(id) {
        Ok(direction) => (StatusCode::OK, format!("{id} released from {direction}\n")),
        Err(e) => error_response(e),
    }
}

/// Handler for `GET /{direction}`<br>
/// Returns the postcard encoded [zcospace::api::QueueSnapshot] of the direction.
async fn queue_get(
    State(daemon): State<Daemon>,
    Path(direction): Path<Direction>,
) -> (StatusCode, Vec<u8>) {
    let snapshot = match daemon.controller.snapshot(direction) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let (status, message) = error_response(e);
            return (status, message.into_bytes());
        }
    };

    match postcard::to_allocvec(&snapshot) {
        Ok(bytes) => (StatusCode::OK, bytes),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{e}\n").into_bytes(),
        ),
    }
}
