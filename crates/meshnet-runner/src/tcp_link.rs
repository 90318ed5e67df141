//! Links over TCP serial bridges.
//!
//! Writes go through an unbounded channel to a writer task so that
//! [`Transport::write`] never blocks the caller; a reader task feeds
//! everything the bridge sends into the controller.

use std::io;

use meshnet_base::{LinkId, NetworkController, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Transport half of a TCP link.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Transport for TcpTransport {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "link writer stopped"))
    }
}

/// A connected TCP link and its tasks.
#[derive(Debug)]
pub struct TcpLink {
    /// Controller link id.
    pub link_id: LinkId,
    /// Bridge address as given.
    pub peer: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TcpLink {
    /// Whether the bridge closed the connection.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() || self.writer.is_finished()
    }

    /// Stop both tasks.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Connect to a bridge and attach it to `controller`.
///
/// `link_addr` is our link address on this link; a random one is picked
/// when `None`.
pub async fn connect_link(
    controller: &NetworkController,
    addr: impl ToSocketAddrs + ToString,
    link_addr: Option<u8>,
) -> io::Result<TcpLink> {
    let peer = addr.to_string();
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let transport = TcpTransport { tx };
    let link_id = match link_addr {
        Some(link_addr) => controller.attach_link(transport, link_addr),
        None => controller.attach_link_random_addr(transport),
    };
    info!("Connected {} to {}", link_id, peer);

    let writer = tokio::spawn(run_writer(writer, rx, link_id));
    let reader = tokio::spawn(run_reader(reader, controller.clone(), link_id));

    Ok(TcpLink {
        link_id,
        peer,
        reader,
        writer,
    })
}

async fn run_reader(mut reader: OwnedReadHalf, controller: NetworkController, link_id: LinkId) {
    let mut read_buf = [0u8; 1024];
    loop {
        match reader.read(&mut read_buf).await {
            Ok(0) => {
                info!("{} closed by bridge", link_id);
                return;
            }
            Ok(n) => {
                trace!("{} rx {}", link_id, hex::encode(&read_buf[..n]));
                controller.on_bytes_received(link_id, &read_buf[..n]);
            }
            Err(e) => {
                warn!("{} read error: {}", link_id, e);
                return;
            }
        }
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    link_id: LinkId,
) {
    while let Some(data) = rx.recv().await {
        trace!("{} tx {}", link_id, hex::encode(&data));
        if let Err(e) = writer.write_all(&data).await {
            warn!("{} write error: {}", link_id, e);
            return;
        }
        if let Err(e) = writer.flush().await {
            warn!("{} flush error: {}", link_id, e);
            return;
        }
    }
    debug!("{} writer stopped", link_id);
}
