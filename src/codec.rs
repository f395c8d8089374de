use std::io::Result;

use tokio::io::AsyncRead;

/// A trait for values that can be decoded from an async stream.
pub trait AsyncDecoder: Sized {
    /// Decodes a value from an async stream.
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self>;
}
