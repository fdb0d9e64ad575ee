//! Bidirectional TCP relay between a client and an upstream connection
//! (§4.3). Two independent copy loops run concurrently; either ending
//! (EOF, read/write error, or a 60s read deadline) tears down both halves.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

const BUF_SIZE: usize = 2048;
const DEADLINE: Duration = Duration::from_secs(60);

/// Relays bytes between `client` and `upstream` until either side closes,
/// errors, or stalls past the 60-second read deadline, or `shutdown`
/// transitions to `true` (server-initiated teardown, §4.5 `closeAll`).
pub async fn relay(client: TcpStream, upstream: TcpStream, shutdown: watch::Receiver<bool>) {
    let (client_r, client_w) = client.into_split();
    let (upstream_r, upstream_w) = upstream.into_split();

    let mut forward = tokio::spawn(copy_loop(client_r, upstream_w, shutdown.clone()));
    let mut backward = tokio::spawn(copy_loop(upstream_r, client_w, shutdown));

    tokio::select! {
        _ = &mut forward => {}
        _ = &mut backward => {}
    }
    forward.abort();
    backward.abort();
}

async fn copy_loop<R, W>(mut reader: R, mut writer: W, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; BUF_SIZE];
    loop {
        if *shutdown.borrow() {
            return;
        }

        let n = tokio::select! {
            _ = shutdown.changed() => return,
            res = tokio::time::timeout(DEADLINE, reader.read(&mut buf)) => {
                match res {
                    Ok(Ok(0)) => return,
                    Ok(Ok(n)) => n,
                    Ok(Err(_)) | Err(_) => return,
                }
            }
        };

        if writer.write_all(&buf[..n]).await.is_err() {
            return;
        }
    }
}
