//! Client-side channel and unary call implementation
//!
//! A [`Client`] owns exactly one connection to a fixed endpoint. The
//! connection is split at construction into a reader task and a writer
//! task; calls hand their request to the writer task and wait on a
//! per-call completion slot that the reader task resolves by message id.
//! Because requests are correlated to responses by id, a `Client` is
//! safe to share across tasks and calls may run concurrently.

use crossbeam::atomic::AtomicCell;
use flume::{Receiver, Sender};
use futures::channel::oneshot;
use futures::lock::Mutex;
use futures::{select, Future, FutureExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::codec::{self, CodecRead, CodecWrite};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::message::{
    AtomicMessageId, ClientMessage, MessageId, RequestBody, RequestHeader, ResponseHeader,
    ResponsePayload, ServerFault,
};

type ResponseMap = HashMap<MessageId, oneshot::Sender<Result<ResponsePayload, Error>>>;

/// A pending RPC call.
///
/// The result is obtained by `.await`ing the `Call`, which yields
/// `Result<Res, Error>`. The call can be abandoned with
/// [`Call::cancel`]; awaiting a cancelled call yields
/// [`Error::Canceled`] and leaves the channel usable for other calls.
#[pin_project::pin_project]
pub struct Call<Res> {
    id: MessageId,
    cancel: Sender<MessageId>,
    #[pin]
    done: oneshot::Receiver<Result<Res, Error>>,
}

impl<Res> Call<Res> {
    /// Cancels the call
    pub fn cancel(&self) {
        if self.cancel.send(self.id).is_ok() {
            log::debug!("call {} canceled", self.id);
        }
    }

    /// Id assigned to this call
    ///
    /// Ids increase monotonically per client and wrap around at
    /// `u16::MAX`.
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl<Res> Future for Call<Res>
where
    Res: serde::de::DeserializeOwned,
{
    type Output = Result<Res, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.done.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(Error::Canceled(*this.id))),
        }
    }
}

/// Client-side channel owning one connection to a fixed endpoint.
///
/// The channel is either open or closed. [`Client::close`] is
/// idempotent; once it has been called every pending and subsequent
/// call fails with [`Error::ChannelClosed`]. Dropping the `Client`
/// releases the connection as well, so the channel cannot outlive the
/// scope that owns it.
pub struct Client {
    count: AtomicMessageId,
    pending: Arc<Mutex<ResponseMap>>,
    next_timeout: AtomicCell<Option<Duration>>,
    closed: Arc<AtomicBool>,

    reader_stop: Sender<()>,
    writer_tx: Sender<ClientMessage>,
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.reader_stop.send(()).is_err() {
            log::debug!("reader loop already stopped");
        }
        if self.writer_tx.send(ClientMessage::Stop).is_err() {
            log::debug!("writer loop already stopped");
        }
    }
}

impl Client {
    /// Connects to the remote service at `endpoint`.
    ///
    /// Connection establishment is eager: the TCP connection is made
    /// before `dial` returns, so an unreachable remote fails here with
    /// [`Error::Connect`] rather than on the first call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hello_rpc::{Client, Endpoint};
    ///
    /// # async fn run() -> Result<(), hello_rpc::Error> {
    /// let endpoint: Endpoint = "127.0.0.1:50051".parse()?;
    /// let client = Client::dial(&endpoint).await?;
    /// # Ok(()) }
    /// ```
    pub async fn dial(endpoint: &Endpoint) -> Result<Client, Error> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(Error::Connect)?;
        log::debug!("connected to {}", endpoint);
        Ok(Self::with_stream(stream))
    }

    /// Creates a client over an already-connected duplex stream
    pub fn with_stream<T>(stream: T) -> Client
    where
        T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let (writer, reader) = codec::split(stream);
        Self::with_codec(reader, writer)
    }

    /// Creates a client over split codec halves and spawns the reader
    /// and writer tasks. Must be called from within a tokio runtime.
    pub fn with_codec<R, W>(reader: R, writer: W) -> Client
    where
        R: CodecRead + 'static,
        W: CodecWrite + 'static,
    {
        let (writer_tx, writer_rx) = flume::unbounded();
        let (reader_stop, stop) = flume::bounded(1);
        let pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::task::spawn(reader_loop(reader, pending.clone(), stop));
        tokio::task::spawn(writer_loop(writer, writer_rx));

        Client {
            count: AtomicMessageId::new(0),
            pending,
            next_timeout: AtomicCell::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            reader_stop,
            writer_tx,
        }
    }

    /// Arms a deadline for the next call only.
    ///
    /// Without an armed deadline a call waits for its response
    /// indefinitely. The deadline is tracked on the client, so a
    /// response arriving at the moment the deadline elapses may still
    /// be reported as [`Error::DeadlineExceeded`].
    pub fn timeout(&self, duration: Duration) -> &Self {
        self.next_timeout.store(Some(duration));
        self
    }

    /// Invokes the named procedure and returns a [`Call`] future.
    ///
    /// The request is serialized and transmitted from background tasks;
    /// `.await`ing the returned `Call` blocks until the response frame
    /// arrives or a failure condition is detected.
    pub fn call<Req, Res>(&self, service_method: impl ToString, args: Req) -> Call<Res>
    where
        Req: serde::Serialize + Send + Sync + 'static,
        Res: serde::de::DeserializeOwned + Send + 'static,
    {
        let id = self.count.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = flume::bounded(1);

        if self.is_closed() {
            let _ = done_tx.send(Err(Error::ChannelClosed));
            return Call {
                id,
                cancel: cancel_tx,
                done: done_rx,
            };
        }

        let header = RequestHeader {
            id,
            service_method: service_method.to_string(),
        };
        let body = Box::new(args) as RequestBody;
        let timeout = self.next_timeout.take();

        tokio::task::spawn(handle_call(
            self.pending.clone(),
            self.closed.clone(),
            header,
            body,
            self.writer_tx.clone(),
            cancel_rx,
            done_tx,
            timeout,
        ));

        Call {
            id,
            cancel: cancel_tx,
            done: done_rx,
        }
    }

    /// Invokes the named procedure and blocks the calling thread until
    /// the result is ready.
    ///
    /// This wraps [`Client::call`] in `tokio::task::block_in_place`, so
    /// it must be called from within a multi-thread tokio runtime and
    /// must not be nested inside another `block_on`.
    pub fn call_blocking<Req, Res>(
        &self,
        service_method: impl ToString,
        args: Req,
    ) -> Result<Res, Error>
    where
        Req: serde::Serialize + Send + Sync + 'static,
        Res: serde::de::DeserializeOwned + Send + 'static,
    {
        let call = self.call(service_method, args);
        tokio::task::block_in_place(|| futures::executor::block_on(call))
    }

    /// Closes the connection.
    ///
    /// Idempotent: the second and later invocations are no-ops. Pending
    /// calls are failed with [`Error::ChannelClosed`] and subsequent
    /// calls fail the same way.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.reader_stop.send_async(()).await.is_err() {
            log::debug!("reader loop already stopped");
        }
        if self.writer_tx.send_async(ClientMessage::Stop).await.is_err() {
            log::debug!("writer loop already stopped");
        }
        let mut pending = self.pending.lock().await;
        for (_, done) in pending.drain() {
            let _ = done.send(Err(Error::ChannelClosed));
        }
    }

    /// Whether [`Client::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn reader_loop<R: CodecRead>(
    mut reader: R,
    pending: Arc<Mutex<ResponseMap>>,
    stop: Receiver<()>,
) {
    loop {
        select! {
            _ = stop.recv_async().fuse() => return,
            res = read_once(&mut reader, &pending).fuse() => match res {
                Ok(true) => {}
                Ok(false) => {
                    // remote closed the connection; fail whoever is waiting
                    let mut pending = pending.lock().await;
                    for (_, done) in pending.drain() {
                        let _ = done.send(Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionAborted,
                            "connection closed by remote",
                        ))));
                    }
                    return;
                }
                Err(err) => log::error!("{}", err),
            },
        }
    }
}

// Ok(false) reports end of stream.
async fn read_once<R: CodecRead>(
    reader: &mut R,
    pending: &Arc<Mutex<ResponseMap>>,
) -> Result<bool, Error> {
    let header = match reader.read_response_header().await {
        Some(header) => header?,
        None => return Ok(false),
    };
    let ResponseHeader { id, is_error } = header;

    let payload = reader.read_response_body().await.ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected EOF reading response body",
        ))
    })??;
    let payload = if is_error { Err(payload) } else { Ok(payload) };

    if let Some(done) = pending.lock().await.remove(&id) {
        done.send(Ok(payload))
            .map_err(|_| Error::Internal("failed to dispatch response to its call".into()))?;
    } else {
        log::debug!("no pending call for response {}", id);
    }
    Ok(true)
}

async fn writer_loop<W: CodecWrite>(mut writer: W, messages: Receiver<ClientMessage>) {
    while let Ok(message) = messages.recv_async().await {
        match message {
            ClientMessage::Request(header, body) => {
                if let Err(err) = writer.write_request(header, &body).await {
                    log::error!("{}", err);
                }
            }
            ClientMessage::Stop => {
                writer.shutdown().await;
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_call<Res>(
    pending: Arc<Mutex<ResponseMap>>,
    closed: Arc<AtomicBool>,
    header: RequestHeader,
    body: RequestBody,
    writer_tx: Sender<ClientMessage>,
    cancel: Receiver<MessageId>,
    done: oneshot::Sender<Result<Res, Error>>,
    timeout: Option<Duration>,
) where
    Res: serde::de::DeserializeOwned + Send,
{
    let id = header.id;

    // register the completion slot before transmitting so the response
    // cannot race past the registration
    let (resp_tx, resp_rx) = oneshot::channel();
    pending.lock().await.insert(id, resp_tx);

    if let Err(err) = writer_tx
        .send_async(ClientMessage::Request(header, body))
        .await
    {
        pending.lock().await.remove(&id);
        let _ = done.send(Err(err.into()));
        return;
    }

    // close() may have drained the map between registration and here
    if closed.load(Ordering::Acquire) {
        if let Some(resp_tx) = pending.lock().await.remove(&id) {
            let _ = resp_tx.send(Err(Error::ChannelClosed));
        }
    }

    select! {
        res = cancel.recv_async().fuse() => {
            // Err means the `Call` itself was dropped; either way the
            // caller is gone and the slot must be reclaimed
            pending.lock().await.remove(&id);
            if res.is_ok() {
                let _ = done.send(Err(Error::Canceled(id)));
            }
        },
        res = handle_response::<Res>(id, resp_rx, timeout).fuse() => {
            // a timed-out response may never arrive, so its slot has to
            // be removed here rather than by the reader
            if let Err(Error::DeadlineExceeded(_)) = res {
                pending.lock().await.remove(&id);
            }
            done.send(res)
                .unwrap_or_else(|_| log::debug!("call {} abandoned before completion", id));
        },
    }
}

async fn handle_response<Res>(
    id: MessageId,
    response: oneshot::Receiver<Result<ResponsePayload, Error>>,
    timeout: Option<Duration>,
) -> Result<Res, Error>
where
    Res: serde::de::DeserializeOwned + Send,
{
    let payload = match timeout {
        None => response
            .await
            .map_err(|err| Error::Internal(Box::new(err)))??,
        Some(duration) => match tokio::time::timeout(duration, response).await {
            Ok(res) => res.map_err(|err| Error::Internal(Box::new(err)))??,
            Err(_) => return Err(Error::DeadlineExceeded(id)),
        },
    };

    match payload {
        Ok(body) => codec::bincode::unmarshal(&body),
        Err(body) => {
            let fault: ServerFault = codec::bincode::unmarshal(&body)?;
            Err(Error::Remote {
                code: fault.code,
                message: fault.message,
            })
        }
    }
}
