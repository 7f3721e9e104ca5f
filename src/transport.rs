//! Newline-delimited JSON framing for the transport boundary

use async_stream::stream;
use futures_util::stream::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::StreamResult;
use crate::operators::FallibleStream;

/// Serialize one item as a JSON line terminated by `\n`
pub fn encode_line<T: Serialize>(item: &T) -> StreamResult<String> {
    let mut line = serde_json::to_string(item)?;
    line.push('\n');
    Ok(line)
}

/// Turn a record stream into ndjson lines, one per item, preserving order.
pub fn to_ndjson<T>(s: FallibleStream<T>) -> FallibleStream<String>
where
    T: Serialize + Send + 'static,
{
    stream! {
        let mut s = s;
        while let Some(item) = s.next().await {
            let line = item.and_then(|value| encode_line(&value));
            let failed = line.is_err();
            yield line;
            if failed {
                break;
            }
        }
    }
    .boxed()
}

/// Write every item of `s` to `writer` as ndjson, flushing after each line.
///
/// Returns the number of lines written; a stream fault stops the write and is
/// returned after the lines already written have been flushed.
pub async fn write_ndjson<T, W>(s: FallibleStream<T>, writer: &mut W) -> StreamResult<u64>
where
    T: Serialize + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut lines = to_ndjson(s);
    let mut written = 0u64;
    while let Some(line) = lines.next().await {
        let line = line?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
