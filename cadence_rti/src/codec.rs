//! Frame codec for the RTI wire protocol: a little-endian u32 length prefix
//! around a bincode payload, layered for `tokio_util::codec::Framed`.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload error: {0}")]
    Payload(#[from] bincode::Error),
}

/// Create a frame codec for message type `T`.
#[inline]
pub fn create<T>() -> FrameCodec<T> {
    FrameCodec {
        frames: LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_length(4)
            .new_codec(),
        _marker: PhantomData,
    }
}

pub struct FrameCodec<T> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(bincode::deserialize(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&item)?;
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for FrameCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec").finish()
    }
}
