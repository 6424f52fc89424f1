//! Transport seam between the session and the model server

use std::future::Future;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::request::GenerateRequest;
use crate::Result;

/// Response body as it arrives. Dropping the stream aborts the request.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

pub trait Transport: Send + Sync + 'static {
    /// Issue a streaming generation request.
    ///
    /// Resolves once response headers are in; non-success statuses must be
    /// reported as errors rather than as a stream.
    fn open(&self, request: &GenerateRequest) -> impl Future<Output = Result<ByteStream>> + Send;
}
