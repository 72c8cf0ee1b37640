use futures_util::{Stream, StreamExt};
use http_body_util::{Full, StreamBody};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame<Bytes>, io::Error>> + Send>>;

/// Body of every registry response.
///
/// Blobs read from the store are streamed; manifests, JSON documents and freshly fetched content
/// are already in memory and sent in one frame.
pub enum ResponseBody {
    Empty,
    Buffered(Full<Bytes>),
    Streaming(StreamBody<FrameStream>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Empty
    }

    pub fn fixed(data: impl Into<Bytes>) -> Self {
        ResponseBody::Buffered(Full::new(data.into()))
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::fixed(value.to_string())
    }

    pub fn streaming<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        let frames = ReaderStream::new(reader).map(|chunk| chunk.map(Frame::data));
        ResponseBody::Streaming(StreamBody::new(Box::pin(frames)))
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            ResponseBody::Empty => Poll::Ready(None),
            ResponseBody::Buffered(body) => Pin::new(body).poll_frame(cx).map_err(io::Error::other),
            ResponseBody::Streaming(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Buffered(body) => body.is_end_stream(),
            ResponseBody::Streaming(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => SizeHint::with_exact(0),
            ResponseBody::Buffered(body) => body.size_hint(),
            ResponseBody::Streaming(_) => SizeHint::default(),
        }
    }
}
