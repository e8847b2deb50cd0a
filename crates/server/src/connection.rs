use std::sync::Arc;

use cache::SerialStore;
use rtr::{FrameError, Pdu, Timing, read_frame, write_pdus};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::session::{Action, Session};

const INBOUND_QUEUE: usize = 32;

/// Per-connection limits taken from the server configuration.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    pub timing: Timing,
    pub max_pdu_size: usize,
}

/// Run one router session over `stream` until either side closes it.
///
/// Reads happen on a separate task so a partially received PDU is never
/// lost when a notification or the expire timer fires first.
pub async fn serve_connection<S>(
    stream: S,
    store: Arc<SerialStore>,
    config: ConnectionConfig,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut writer = BufWriter::new(writer);
    let (tx, mut inbound) = mpsc::channel(INBOUND_QUEUE);
    let reader_task = tokio::spawn(read_loop(reader, config.max_pdu_size, tx));

    let mut events = store.subscribe();
    let mut session = Session::new(store, config.timing, Instant::now());

    let result = loop {
        let deadline = session.expires_at();
        let actions = tokio::select! {
            frame = inbound.recv() => match frame {
                Some(Ok(pdu)) => {
                    debug!(pdu = %pdu.pdu_type(), "received pdu");
                    session.handle_pdu(&pdu, Instant::now())
                }
                Some(Err(FrameError::Decode { error, raw })) => {
                    session.handle_decode_error(&error, &raw)
                }
                Some(Err(FrameError::Io(err))) => {
                    debug!(error = ?err, "read failed");
                    session.close("read failed")
                }
                Some(Err(FrameError::Closed)) | None => session.close("router disconnected"),
            },
            event = events.recv() => match event {
                Ok(event) => {
                    debug!(?event, "store event");
                    session.serial_advanced()
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "store events coalesced");
                    session.serial_advanced()
                }
                Err(RecvError::Closed) => session.close("store shut down"),
            },
            _ = sleep_until(deadline) => session.tick(Instant::now()),
        };

        match execute(&mut session, &mut writer, actions).await {
            Ok(None) => continue,
            Ok(Some(reason)) => break Ok(reason),
            Err(err) => break Err(err),
        }
    };

    reader_task.abort();
    let _ = writer.shutdown().await;
    match result {
        Ok(reason) => {
            info!(%reason, "router session closed");
            Ok(())
        }
        Err(err) => {
            warn!(error = ?err, "router session failed");
            Err(err)
        }
    }
}

/// Carry out `actions` in order. Returns the close reason once the session
/// asked to be closed.
async fn execute<W>(
    session: &mut Session,
    writer: &mut BufWriter<WriteHalf<W>>,
    mut actions: Vec<Action>,
) -> Result<Option<String>, ServerError>
where
    W: AsyncWrite,
{
    while !actions.is_empty() {
        let mut wrote = false;
        for action in actions {
            match action {
                Action::Send(pdus) => {
                    if let Err(err) = write_pdus(writer, &pdus).await {
                        session.close("write failed");
                        return Err(err.into());
                    }
                    wrote = true;
                }
                Action::Close { reason } => return Ok(Some(reason)),
            }
        }
        actions = if wrote { session.flushed() } else { Vec::new() };
    }
    Ok(None)
}

async fn read_loop<R>(
    mut reader: ReadHalf<R>,
    max_pdu_size: usize,
    tx: mpsc::Sender<Result<Pdu, FrameError>>,
) where
    R: AsyncRead,
{
    loop {
        let frame = read_frame(&mut reader, max_pdu_size).await;
        let last = frame.is_err();
        if tx.send(frame).await.is_err() || last {
            break;
        }
    }
}
