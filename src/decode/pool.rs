//! Runs decoders on rayon's thread pool so the frame loop is never blocked.

use super::{DecodeError, DecodeResult};
use futures::channel::oneshot;

/// Run `decode` on a rayon worker and await its result.
///
/// Dropping the returned future leaves the worker running to completion; its
/// result is discarded.
pub async fn decode_off_thread<T, F>(decode: F) -> DecodeResult<T>
where
    F: FnOnce() -> DecodeResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    rayon::spawn(move || {
        // receiver gone means the load was cancelled
        let _ = sender.send(decode());
    });

    receiver.await.map_err(|_| DecodeError::WorkerLost)?
}

/// Run `decode` on a rayon worker when `off_thread` is set, inline otherwise.
pub async fn run_decode<T, F>(off_thread: bool, decode: F) -> DecodeResult<T>
where
    F: FnOnce() -> DecodeResult<T> + Send + 'static,
    T: Send + 'static,
{
    if off_thread {
        decode_off_thread(decode).await
    } else {
        decode()
    }
}
