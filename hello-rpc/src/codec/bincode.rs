//! `Marshal` and `Unmarshal` implementations with `bincode`

use bincode::{DefaultOptions, Options};

use super::{CodecReader, CodecWriter, Marshal, Unmarshal};
use crate::error::Error;

// Headers and bodies use varint encoding; only the fixed-size frame
// header uses fixint (see transport::frame).

pub(crate) fn marshal<S: serde::Serialize>(val: &S) -> Result<Vec<u8>, Error> {
    DefaultOptions::new()
        .with_varint_encoding()
        .serialize(val)
        .map_err(|err| err.into())
}

pub(crate) fn unmarshal<'de, D: serde::Deserialize<'de>>(buf: &'de [u8]) -> Result<D, Error> {
    DefaultOptions::new()
        .with_varint_encoding()
        .deserialize(buf)
        .map_err(|err| err.into())
}

impl<W> Marshal for CodecWriter<W> {
    fn marshal<S: serde::Serialize>(val: &S) -> Result<Vec<u8>, Error> {
        marshal(val)
    }
}

impl<R> Unmarshal for CodecReader<R> {
    fn unmarshal<'de, D: serde::Deserialize<'de>>(buf: &'de [u8]) -> Result<D, Error> {
        unmarshal(buf)
    }
}
