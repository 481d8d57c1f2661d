use crate::{
    common::data::{ErrorResponse, StubConfig},
    server::handler::Error::{self, ResponseBodySerializeError, ResponseConstructionError},
};
use http::{header::CONTENT_TYPE, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};
use tokio::time::Sleep;

pub(crate) type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// A response body that holds back its only data frame until a delay has elapsed.
///
/// The status line and headers go out as soon as the response is returned to the connection.
/// The pending delay is a timer registration, so the connection task yields while waiting.
/// The data must not be empty: an exact length of zero lets the client finish reading before
/// the delay has elapsed.
pub(crate) struct DelayedBody {
    delay: Option<Pin<Box<Sleep>>>,
    data: Option<Bytes>,
}

impl DelayedBody {
    pub fn new(data: Bytes, delay: Duration) -> Self {
        Self {
            delay: (!delay.is_zero()).then(|| Box::pin(tokio::time::sleep(delay))),
            data: Some(data),
        }
    }
}

impl Body for DelayedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(delay) = this.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.delay = None;
        }

        Poll::Ready(this.data.take().map(|data| Ok(Frame::data(data))))
    }

    fn is_end_stream(&self) -> bool {
        self.delay.is_none() && self.data.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.data.as_ref().map_or(0, |data| data.len() as u64))
    }
}

/// Builds the response a matched stub describes. The response completes once the stub's
/// delay has elapsed.
pub(crate) async fn stub_response(stub: &StubConfig) -> Result<Response<ResponseBody>, Error> {
    let definition = stub.response();

    let mut builder = Response::builder().status(StatusCode::from_u16(definition.status_code)?);
    for (name, value) in &definition.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let delay = Duration::from_millis(definition.delay);
    let data = definition.body.to_bytes();
    let body = if data.is_empty() {
        // Without payload the head completes the response, so the head waits instead.
        tokio::time::sleep(delay).await;
        empty()
    } else {
        DelayedBody::new(data, delay)
            .map_err(|never| match never {})
            .boxed()
    };

    builder.body(body).map_err(ResponseConstructionError)
}

/// The response for a request no stub matched.
pub(crate) fn no_match_response(
    method: &str,
    path: &str,
) -> Result<Response<ResponseBody>, Error> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse::new(&format!("no stub matches {} {}", method, path)),
    )
}

pub(crate) fn json_response<T>(
    status: StatusCode,
    body: &T,
) -> Result<Response<ResponseBody>, Error>
where
    T: serde::Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(body).map_err(ResponseBodySerializeError)?;

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full(bytes))
        .map_err(ResponseConstructionError)
}

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}
