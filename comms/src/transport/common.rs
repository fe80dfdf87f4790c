use std::pin::Pin;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::tcp::OwnedReadHalf,
};
use tokio_stream::{wrappers::LinesStream, Stream, StreamExt};

pub const NEW_LINE: &[u8; 2] = b"\r\n";

pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Turns the read half of a TCP stream into a stream of newline delimited
/// JSON frames of type `T`. Both transport directions decode this way, only
/// the frame type and the peer name in error messages differ.
pub(super) fn frame_stream<T>(reader: OwnedReadHalf, peer: &'static str) -> BoxedStream<anyhow::Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    Box::pin(
        LinesStream::new(BufReader::new(reader).lines()).map(move |line| {
            line.with_context(|| format!("could not read line from the {}", peer))
                .and_then(|line| {
                    serde_json::from_str::<T>(&line)
                        .with_context(|| format!("failed to deserialize frame from the {}", peer))
                })
        }),
    )
}
