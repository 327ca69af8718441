pub mod eventstream;
pub mod http;
mod http_errors;

use futures::Stream;
use std::future::Future;
use std::pin::Pin;

use crate::error::TransportError;
use crate::model::InvocationRequest;

pub use http::BedrockHttpTransport;

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub model_id: String,
    pub payload: InvocationRequest,
}

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + 'a>>;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a>>;

pub trait Transport {
    fn send<'a>(&'a self, request: TransportRequest) -> TransportFuture<'a, Vec<u8>>;

    fn send_streaming<'a>(&'a self, request: TransportRequest)
    -> TransportFuture<'a, ChunkStream<'a>>;
}
