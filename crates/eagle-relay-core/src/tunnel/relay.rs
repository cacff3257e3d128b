//! Full-duplex byte relay between the two ends of a tunnel.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::user::EagleUser;

const RELAY_BUFFER_SIZE: usize = 8192;

/// Relay data between two TCP streams until either side closes.
///
/// Every chunk is charged to `user`, waiting on its byte quota while limited.
/// Returns (bytes_left_to_right, bytes_right_to_left).
pub async fn relay_tcp(left: TcpStream, right: TcpStream, user: Option<Arc<EagleUser>>) -> (u64, u64) {
    let (mut left_read, mut left_write) = left.into_split();
    let (mut right_read, mut right_write) = right.into_split();

    let (sent, received) = tokio::join!(
        copy_half(&mut left_read, &mut right_write, user.as_deref()),
        copy_half(&mut right_read, &mut left_write, user.as_deref()),
    );

    debug!("Relay complete: sent={}, received={}", sent, received);

    (sent, received)
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W, user: Option<&EagleUser>) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                total += n as u64;

                if let Some(user) = user {
                    user.consume(n as u64).await;
                }
            }
            Err(_) => break,
        }
    }

    let _ = writer.shutdown().await;
    total
}
