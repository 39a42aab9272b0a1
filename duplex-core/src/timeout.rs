//! Timeout wrappers for `compio` I/O, used by the greeting and mutual-auth
//! handshake to enforce the 5-second budget.

use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::time::timeout;
use std::io;
use std::time::Duration;

/// Read exactly `buf.len()` bytes, or fail with `ErrorKind::TimedOut` if
/// `duration` elapses first. `None` blocks indefinitely.
pub async fn read_exact_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<(), B>>
where
    S: AsyncRead + Unpin,
    B: compio::buf::IoBufMut,
{
    match duration {
        None => Ok(stream.read_exact(buf).await),
        Some(d) => match timeout(d, stream.read_exact(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        },
    }
}

/// Write the entire buffer, or fail with `ErrorKind::TimedOut` if
/// `duration` elapses first. `None` blocks indefinitely.
pub async fn write_all_with_timeout<S, B>(
    stream: &mut S,
    buf: B,
    duration: Option<Duration>,
) -> io::Result<compio::buf::BufResult<(), B>>
where
    S: AsyncWrite + Unpin,
    B: compio::buf::IoBuf,
{
    match duration {
        None => Ok(stream.write_all(buf).await),
        Some(d) => match timeout(d, stream.write_all(buf)).await {
            Ok(result) => Ok(result),
            Err(_elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        },
    }
}
