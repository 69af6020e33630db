//! In-memory transport doubles for service tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Frame, FrameStream, Transport, TransportFactory};
use crate::domain::connection::{ErrorKind, validate_url};

/// How a fake transport's `open` behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Succeed,
    Fail(String),
    Hang,
}

type Inbound = Result<Frame, ErrorKind>;

pub struct FakeTransport {
    behavior: OpenBehavior,
    open: AtomicBool,
    close_calls: AtomicUsize,
    sent: Mutex<Vec<Frame>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    cancel: CancellationToken,
}

impl FakeTransport {
    fn new(behavior: OpenBehavior) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            behavior,
            open: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Deliver an inbound frame.
    pub fn push_frame(&self, frame: impl Into<Vec<u8>>) {
        let _ = self.inbound_tx.send(Ok(frame.into()));
    }

    /// Simulate the remote end dropping the connection.
    pub fn fail_remote(&self, detail: &str) {
        let _ = self
            .inbound_tx
            .send(Err(ErrorKind::ReceiveFailed(detail.to_string())));
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, url: &str) -> Result<(), ErrorKind> {
        validate_url(url)?;
        match &self.behavior {
            OpenBehavior::Succeed => {
                self.open.store(true, Ordering::SeqCst);
                Ok(())
            }
            OpenBehavior::Fail(detail) => Err(ErrorKind::ConnectionFailed(detail.clone())),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.open.store(false, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ErrorKind> {
        if !self.is_open() {
            return Err(ErrorKind::SendFailed("not connected".to_string()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn receive_frames(&self) -> FrameStream {
        match self.inbound_rx.lock().take() {
            Some(rx) => UnboundedReceiverStream::new(rx)
                .take_until(self.cancel.clone().cancelled_owned())
                .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Factory that hands out queued behaviors, then the default one.
pub struct FakeTransportFactory {
    default: OpenBehavior,
    queued: Mutex<VecDeque<OpenBehavior>>,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new(default: OpenBehavior) -> Self {
        Self {
            default,
            queued: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Queue a behavior for the next created transport.
    pub fn push(&self, behavior: OpenBehavior) {
        self.queued.lock().push_back(behavior);
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().last().cloned()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        let behavior = self
            .queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        let transport = Arc::new(FakeTransport::new(behavior));
        self.created.lock().push(Arc::clone(&transport));
        transport
    }
}
