use actix_web::body::{BodySize, MessageBody};
use actix_web::web::Bytes;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::application::use_cases::log_broadcaster::LogSubscription;

/// Chunked response body that forwards one live channel, one line per chunk.
/// Ends when the broadcaster drops the subscriber; dropping the body (client
/// gone) unsubscribes.
pub struct LiveLogBody {
    subscription: LogSubscription,
}

impl LiveLogBody {
    pub fn new(subscription: LogSubscription) -> Self {
        Self { subscription }
    }
}

impl MessageBody for LiveLogBody {
    type Error = Infallible;

    fn size(&self) -> BodySize {
        BodySize::Stream
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.get_mut();
        match this.subscription.poll_recv(cx) {
            Poll::Ready(Some(mut line)) => {
                line.push('\n');
                Poll::Ready(Some(Ok(Bytes::from(line))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
