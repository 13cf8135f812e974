use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};
use tracing::{debug, warn};

use crate::{
    config::Config,
    request::Request,
    resp_value::{RespError, RespValue, MAX_REQUEST_LEN},
    response::Response,
    store::RevealStore,
};

pub fn handle_request(store: &RevealStore, config: &Config, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Reveal(id) => {
            store.reveal(id);
            Response::Ok
        }
        Request::Revealed(id) => Response::Bool(store.is_revealed(id)),
        Request::Seen(id) => Response::Bool(store.is_permanently_revealed(id)),
        Request::TimeRemaining(id) => {
            let millis = store.time_remaining(id).as_millis();
            Response::Integer(i64::try_from(millis).unwrap_or(i64::MAX))
        }
        Request::Expire(id) => {
            store.expire(id);
            Response::Ok
        }
        Request::Clear => {
            store.clear();
            Response::Ok
        }
        Request::Sweep => Response::Integer(store.sweep() as i64),
        Request::Ids => Response::Ids(store.revealed_ids()),
        Request::Stats => Response::Stats(store.stats()),
        Request::ConfigGet(parameter) => Response::ConfigGet(
            config
                .effective(parameter)
                .map(|value| (parameter, value)),
        ),
    }
}

/// Serve one client until it disconnects. Frames may arrive split across
/// reads or several to a read; each complete frame gets one reply.
pub async fn handle_connection<S>(
    mut stream: S,
    store: Arc<RevealStore>,
    config: Arc<Config>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut input_buf = BytesMut::with_capacity(512);
    let mut output_buf = BytesMut::with_capacity(512);
    loop {
        if stream.read_buf(&mut input_buf).await? == 0 {
            if !input_buf.is_empty() {
                debug!(pending = input_buf.len(), "client closed mid-frame");
            }
            return Ok(());
        }

        output_buf.clear();
        let mut close = false;
        loop {
            let consumed = match RespValue::deserialize(&input_buf) {
                Ok((value, consumed)) => {
                    if !matches!(&value, RespValue::Array(elements) if elements.is_empty()) {
                        let response = match Request::from_resp(&value) {
                            Ok(request) => {
                                // Store operations touch the backend synchronously.
                                let store = store.clone();
                                let config = config.clone();
                                tokio::task::spawn_blocking(move || {
                                    handle_request(&store, &config, request)
                                })
                                .await?
                            }
                            Err(e) => Response::Error(e.to_string()),
                        };
                        response.serialize(&mut output_buf);
                    }
                    consumed
                }
                Err(RespError::Incomplete) if input_buf.len() > MAX_REQUEST_LEN => {
                    warn!(pending = input_buf.len(), "closing connection after oversized request");
                    Response::Error("request too large".to_string()).serialize(&mut output_buf);
                    close = true;
                    break;
                }
                Err(RespError::Incomplete) => break,
                Err(RespError::Invalid(message)) => {
                    // Framing is lost; report and hang up.
                    warn!(%message, "closing connection after protocol error");
                    Response::Error(message).serialize(&mut output_buf);
                    close = true;
                    break;
                }
            };
            input_buf.advance(consumed);
        }

        if !output_buf.is_empty() {
            stream.write_all(&output_buf).await?;
            stream.flush().await?;
        }
        if close {
            return Ok(());
        }
    }
}

pub async fn serve(
    listener: TcpListener,
    store: Arc<RevealStore>,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "client connected");
        let store = store.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, store, config).await {
                warn!(%peer, error = %e, "connection failed");
            }
        });
    }
}
