//! Unix domain socket transport helpers.
//!
//! Backs `unix://` endpoints. Per the wire spec, a `Listener` bound to a
//! `unix://` path removes any stale socket file left behind by a previous,
//! uncleanly-terminated process before binding.

#[cfg(unix)]
use compio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
/// Connect to a Unix domain socket.
///
/// # Examples
///
/// ```no_run
/// use duplex_core::unix;
///
/// #[compio::main]
/// async fn main() -> std::io::Result<()> {
///     let stream = unix::connect("/tmp/socket.sock").await?;
///     Ok(())
/// }
/// ```
pub async fn connect<P: AsRef<Path>>(path: P) -> std::io::Result<UnixStream> {
    UnixStream::connect(path).await
}

#[cfg(unix)]
/// Bind a Unix domain socket listener, removing any stale socket file left
/// at `path` first.
///
/// # Examples
///
/// ```no_run
/// use duplex_core::unix;
///
/// #[compio::main]
/// async fn main() -> std::io::Result<()> {
///     let listener = unix::bind("/tmp/socket.sock").await?;
///     Ok(())
/// }
/// ```
pub async fn bind<P: AsRef<Path>>(path: P) -> std::io::Result<UnixListener> {
    let path_ref = path.as_ref();
    if path_ref.exists() {
        std::fs::remove_file(path_ref)?;
    }

    UnixListener::bind(path).await
}

#[cfg(unix)]
/// Accept a connection on a Unix domain socket listener.
pub async fn accept(listener: &UnixListener) -> std::io::Result<UnixStream> {
    let (stream, _addr) = listener.accept().await?;
    Ok(stream)
}
