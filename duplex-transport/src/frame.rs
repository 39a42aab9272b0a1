//! The wire unit: [`Frame`].
//!
//! A frame is the on-the-wire record a `Channel` sends and receives. Exactly
//! one open-frame starts a channel; zero or more data-frames follow; at most
//! one `last=true` frame terminates each direction (spec.md §3).

use bytes::Bytes;

/// Which of the two frame shapes this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Opens a channel: carries `service` and `headers`.
    Open,
    /// Carries payload bytes (and/or an error) on an already-open channel.
    Data,
}

/// One frame belonging to a [`Channel`](https://docs.rs/duplex/latest/duplex/struct.Channel.html).
///
/// `target` is a client-side routing hint consumed by the Peer's router; it
/// is never put on the wire (spec.md §3).
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub channel_id: u32,
    pub service: Option<String>,
    pub headers: Vec<String>,
    pub error: Option<String>,
    pub last: bool,
    pub payload: Bytes,
}

impl Frame {
    /// Build an open-frame.
    #[must_use]
    pub fn open(channel_id: u32, service: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            kind: FrameKind::Open,
            channel_id,
            service: Some(service.into()),
            headers,
            error: None,
            last: false,
            payload: Bytes::new(),
        }
    }

    /// Build a data-frame carrying `payload`.
    #[must_use]
    pub fn data(channel_id: u32, payload: Bytes, last: bool) -> Self {
        Self {
            kind: FrameKind::Data,
            channel_id,
            service: None,
            headers: Vec::new(),
            error: None,
            last,
            payload,
        }
    }

    /// Build an error-frame (a data-frame carrying only an error string).
    #[must_use]
    pub fn error_frame(channel_id: u32, message: impl Into<String>, last: bool) -> Self {
        Self {
            kind: FrameKind::Data,
            channel_id,
            service: None,
            headers: Vec::new(),
            error: Some(message.into()),
            last,
            payload: Bytes::new(),
        }
    }

    /// True if this frame carries a non-empty error string.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_frame_carries_service_and_headers() {
        let f = Frame::open(7, "echo", vec!["k=v".to_string()]);
        assert_eq!(f.kind, FrameKind::Open);
        assert_eq!(f.service.as_deref(), Some("echo"));
        assert_eq!(f.headers, vec!["k=v".to_string()]);
    }

    #[test]
    fn error_frame_has_error() {
        let f = Frame::error_frame(1, "boom", true);
        assert!(f.has_error());
        assert!(f.last);
    }

    #[test]
    fn data_frame_has_no_error_by_default() {
        let f = Frame::data(1, Bytes::from_static(b"hi"), false);
        assert!(!f.has_error());
    }
}
