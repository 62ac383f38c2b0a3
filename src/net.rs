use std::io;
use std::net::SocketAddr;

#[cfg(not(feature = "turmoil"))]
pub use tokio::net::*;

#[cfg(feature = "turmoil")]
pub use turmoil::net::*;

/// Bind `addr` and return the stream of accepted connections for the gRPC server.
#[cfg(not(feature = "turmoil"))]
pub async fn bind_incoming(
    addr: SocketAddr,
) -> io::Result<tokio_stream::wrappers::TcpListenerStream> {
    let listener = TcpListener::bind(addr).await?;
    Ok(tokio_stream::wrappers::TcpListenerStream::new(listener))
}

/// Bind `addr` on the simulated network and return the stream of accepted connections.
#[cfg(feature = "turmoil")]
pub async fn bind_incoming(
    addr: SocketAddr,
) -> io::Result<impl futures::Stream<Item = io::Result<sim::SimStream>>> {
    let listener = TcpListener::bind(addr).await?;
    Ok(async_stream::stream! {
        loop {
            yield listener.accept().await.map(|(stream, _)| sim::SimStream(stream));
        }
    })
}

/// Glue between turmoil's simulated TCP and the tonic client and server.
#[cfg(feature = "turmoil")]
pub mod sim {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use hyper::Uri;
    use hyper_util::client::legacy::connect::{Connected, Connection};
    use hyper_util::rt::TokioIo;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tonic::transport::server::TcpConnectInfo;
    use turmoil::net::TcpStream;

    /// Dial the node named by `uri`. Used through `tower::service_fn` as a channel connector.
    pub async fn connect(uri: Uri) -> io::Result<TokioIo<SimStream>> {
        let authority = uri.authority().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no host in `{}`", uri))
        })?;
        let stream = TcpStream::connect(authority.as_str()).await?;
        Ok(TokioIo::new(SimStream(stream)))
    }

    /// A simulated connection, on either end.
    pub struct SimStream(pub TcpStream);

    impl Connection for SimStream {
        fn connected(&self) -> Connected {
            Connected::new()
        }
    }

    impl tonic::transport::server::Connected for SimStream {
        type ConnectInfo = TcpConnectInfo;

        fn connect_info(&self) -> TcpConnectInfo {
            TcpConnectInfo {
                local_addr: self.0.local_addr().ok(),
                remote_addr: self.0.peer_addr().ok(),
            }
        }
    }

    impl AsyncRead for SimStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for SimStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
        }
    }
}
