//! Serial link interfaces.
//!
//! A link pairs a byte [`Transport`] with the frame decoder for the bytes
//! coming back from it. The decoder has its own lock so receiver loops for
//! different links never contend.

use std::fmt;
use std::io;
use std::sync::Arc;

use meshnet_frame::{encode_frame, Frame, FrameDecoder};
use meshnet_metrics::metric_defs;
use parking_lot::Mutex;

use crate::SendError;

/// Outgoing byte sink of one link.
pub trait Transport: Send + Sync {
    /// Write a complete encoded frame.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }
}

/// Identifier of an attached link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(usize);

impl LinkId {
    /// Create a link id from its index.
    pub const fn new(index: usize) -> Self {
        LinkId(index)
    }

    /// Index of the link in attach order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link{}", self.0)
    }
}

/// Pick a random non-broadcast link address.
pub fn random_link_addr() -> u8 {
    rand::Rng::gen_range(&mut rand::thread_rng(), 1..=u8::MAX)
}

/// One attached link.
pub struct SerialLink {
    id: LinkId,
    local_addr: u8,
    transport: Box<dyn Transport>,
    decoder: Mutex<FrameDecoder>,
}

impl SerialLink {
    pub(crate) fn new(id: LinkId, transport: Box<dyn Transport>, local_addr: u8) -> Self {
        SerialLink {
            id,
            local_addr,
            transport,
            decoder: Mutex::new(FrameDecoder::new(local_addr)),
        }
    }

    /// Link id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Our link address on this link.
    pub fn local_addr(&self) -> u8 {
        self.local_addr
    }

    /// Frame `payload` for `dest_addr` and write it.
    pub fn send_frame(&self, dest_addr: u8, payload: &[u8]) -> Result<(), SendError> {
        let bytes = encode_frame(self.local_addr, dest_addr, payload)?;
        self.transport.write(&bytes)?;
        metrics::counter!(metric_defs::FRAMES_TX.name).increment(1);
        metrics::histogram!(metric_defs::FRAME_TX_BYTES.name).record(bytes.len() as f64);
        Ok(())
    }

    /// Feed received bytes, returning the frames they complete.
    pub fn receive(&self, bytes: &[u8]) -> Vec<Frame> {
        self.decoder.lock().push(bytes)
    }
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<Vec<u8>>>);

    impl Transport for Capture {
        fn write(&self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().push(bytes.to_vec());
            Ok(())
        }
    }

    struct Broken;

    impl Transport for Broken {
        fn write(&self, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[test]
    fn test_send_and_receive() {
        let capture = Arc::new(Capture::default());
        let a = SerialLink::new(LinkId::new(0), Box::new(capture.clone()), 10);
        let b = SerialLink::new(LinkId::new(1), Box::new(Broken), 20);

        a.send_frame(20, &[1, 2, 3]).unwrap();
        let written = capture.0.lock().pop().unwrap();
        let frames = b.receive(&written);
        assert_eq!(frames, vec![Frame::new(10, 20, vec![1, 2, 3])]);
    }

    #[test]
    fn test_send_errors() {
        let link = SerialLink::new(LinkId::new(0), Box::new(Broken), 10);
        assert!(matches!(link.send_frame(0, &[1]), Err(SendError::Io(_))));
        assert!(matches!(
            link.send_frame(0, &[0; 36]),
            Err(SendError::Frame(_))
        ));
    }

    #[test]
    fn test_random_link_addr_not_broadcast() {
        for _ in 0..1000 {
            assert_ne!(random_link_addr(), 0);
        }
    }

    #[test]
    fn test_link_id_display() {
        assert_eq!(LinkId::new(3).to_string(), "link3");
        assert_eq!(LinkId::new(3).index(), 3);
    }
}
