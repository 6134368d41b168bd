use crate::{ProtocolError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::io;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Bytes buffered in each direction of an in-process pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Pending connections a listener may hold before connectors wait
const BACKLOG: usize = 128;

/// Names bound by in-process listeners in this process
static REGISTRY: Lazy<DashMap<String, mpsc::Sender<DuplexStream>>> = Lazy::new(DashMap::new);

/// Accepting side of an `inproc://` endpoint. The name is released on drop.
pub(crate) struct InprocListener {
    name: String,
    acceptor: mpsc::Sender<DuplexStream>,
    incoming: mpsc::Receiver<DuplexStream>,
}

impl InprocListener {
    pub(crate) fn bind(name: &str) -> Result<Self> {
        let (acceptor, incoming) = mpsc::channel(BACKLOG);

        match REGISTRY.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_closed() {
                    return Err(ProtocolError::IoError(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("inproc://{} is already bound", name),
                    )));
                }
                existing.insert(acceptor.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(acceptor.clone());
            }
        }

        Ok(InprocListener {
            name: name.to_string(),
            acceptor,
            incoming,
        })
    }

    pub(crate) async fn accept(&mut self) -> Result<DuplexStream> {
        self.incoming.recv().await.ok_or(ProtocolError::Closed)
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        REGISTRY.remove_if(&self.name, |_, sender| sender.same_channel(&self.acceptor));
    }
}

/// Open a pipe to the listener bound at `name`
pub(crate) async fn connect(name: &str) -> Result<DuplexStream> {
    let refused = || {
        ProtocolError::IoError(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("nothing bound at inproc://{}", name),
        ))
    };

    // Clone the sender so no map guard is held across the await below.
    let acceptor = REGISTRY
        .get(name)
        .map(|entry| entry.value().clone())
        .ok_or_else(refused)?;

    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    acceptor.send(remote).await.map_err(|_| refused())?;
    Ok(local)
}
