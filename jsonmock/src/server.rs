use crate::{error::Error, responder::Responder};
use hyper::{
    body,
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use std::{convert::Infallible, future::Future, io, net::SocketAddr, sync::Arc};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, info};

/// The responder bound to a socket. Must be started inside a tokio runtime.
#[derive(Debug)]
pub struct MockServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<Result<(), Error>>,
}

impl MockServer {
    pub fn start(addr: SocketAddr, responder: Arc<Responder>) -> Result<Self, Error> {
        let server = Server::try_bind(&addr)?.serve(make_service_fn(move |_| {
            let responder = responder.clone();

            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle_request(responder.clone(), request)
                }))
            }
        }));

        let local_addr = server.local_addr();
        let (shutdown, signal) = oneshot::channel::<()>();
        let server = server.with_graceful_shutdown(async move {
            let _ = signal.await;
        });

        let join_handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("jsonmock server error: {}", e);
                return Err(e.into());
            }

            Ok(())
        });
        info!("listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown),
            join_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the in-flight ones.
    pub async fn shutdown(mut self) -> Result<(), Error> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        match self.join_handle.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e).into()),
        }
    }

    /// Serves until `signal` resolves, then shuts down gracefully.
    pub async fn serve_until<F: Future<Output = ()>>(self, signal: F) -> Result<(), Error> {
        signal.await;
        info!("shutting down {}", self.local_addr);

        self.shutdown().await
    }
}

async fn handle_request(
    responder: Arc<Responder>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    match respond(&responder, request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("unable to answer: {}", e);

            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(response)
        }
    }
}

async fn respond(responder: &Responder, request: Request<Body>) -> Result<Response<Body>, Error> {
    let (parts, body) = request.into_parts();
    let body = body::to_bytes(body).await?;

    responder
        .respond(&parts.method, parts.uri.query(), &body)
        .into_response()
}
