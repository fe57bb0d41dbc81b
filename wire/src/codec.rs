use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("serializing message payload")]
    Serializing(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frames and parses `<decimal-byte-length>\n<payload>` messages.
///
/// Malformed input never errors out of the decoder: a line that isn't a valid
/// length prefix, or a payload that doesn't deserialize, is logged and
/// skipped, and decoding resynchronizes on the next frame. A payload longer
/// than its declared length is truncated at the declared boundary; the
/// remainder is treated as the start of the next frame.
pub struct FrameCodec<In> {
    _marker: PhantomData<fn() -> In>,
}

impl<In> Default for FrameCodec<In> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<In> FrameCodec<In> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<In> Decoder for FrameCodec<In>
where
    In: DeserializeOwned,
{
    type Item = In;

    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(eol) = src.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };

            let declared = std::str::from_utf8(&src[..eol])
                .ok()
                .and_then(|prefix| prefix.trim().parse::<usize>().ok());
            let Some(declared) = declared else {
                tracing::warn!(
                    prefix = %String::from_utf8_lossy(&src[..eol]),
                    "expected length prefix, discarding line"
                );
                src.advance(eol + 1);
                continue;
            };

            // no message is emitted until the full declared payload is buffered
            if src.len() < eol + 1 + declared {
                return Ok(None);
            }

            let payload = &src[eol + 1..eol + 1 + declared];
            match serde_json::from_slice(payload) {
                Ok(message) => {
                    src.advance(eol + 1 + declared);
                    return Ok(Some(message));
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "discarding ill-formed frame"
                    );
                    src.advance(eol + 1 + declared);
                }
            }
        }
    }
}

impl<In, Out> Encoder<Out> for FrameCodec<In>
where
    Out: Serialize,
{
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_frame(&item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(message).map_err(CodecError::Serializing)?;
    let mut frame = format!("{}\n", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use futures::prelude::*;
    use tokio_util::codec::FramedRead;

    use crate::messages::{Command, EngineMessage};
    use crate::types::Breakpoint;

    use super::*;

    fn construct_frame(message: &serde_json::Value) -> Vec<u8> {
        let payload = serde_json::to_string(message).unwrap();
        format!("{}\n{}", payload.len(), payload).into_bytes()
    }

    macro_rules! create_test {
        ($name:ident, $extra:expr, $($input:expr => $expected:pat),+) => {
            #[tokio::test]
            async fn $name() {
                let mut frames = bytes::BytesMut::new();
                $(
                    let input = construct_frame(&$input);
                    frames.put(&input[..]);
                )+

                frames.put(&$extra[..]);

                let mut framed_read =
                    FramedRead::new(&frames[..], FrameCodec::<EngineMessage>::new());

                $(
                    let Some(msg) = framed_read.next().await else {
                        panic!()
                    };

                    let msg = msg.unwrap();
                    assert!(matches!(msg, $expected), "got message {msg:?}");
                )+
            }
        };

        ($name:ident, $($input:expr => $expected:pat),+) => {
            create_test!($name, b"", $($input => $expected),+);
        };
    }

    create_test!(
        connect,
        serde_json::json!({"type": "connect"}) => EngineMessage::Connect
    );

    create_test!(
        connect_then_event,
        serde_json::json!({"type": "connect"}) => EngineMessage::Connect,
        serde_json::json!({"type": "breakpointHit", "value": 42}) =>
            EngineMessage::BreakpointHit(42)
    );

    create_test!(
        trailing_partial_data,
        b"14",
        serde_json::json!({"type": "stopOnStep"}) => EngineMessage::StopOnStep
    );

    #[tokio::test]
    async fn split_into_arbitrary_chunks() {
        // a chunked stream decodes to the same messages as the unsplit stream
        let mut unsplit = construct_frame(&serde_json::json!({"type": "connect"}));
        unsplit.extend(construct_frame(
            &serde_json::json!({"type": "programLoaded", "value": "main.js"}),
        ));

        for chunk_size in 1..unsplit.len() {
            let mut decoder = FrameCodec::<EngineMessage>::new();
            let mut buffer = BytesMut::new();
            let mut messages = Vec::new();
            for chunk in unsplit.chunks(chunk_size) {
                buffer.put(chunk);
                while let Some(msg) = decoder.decode(&mut buffer).unwrap() {
                    messages.push(msg);
                }
            }
            assert_eq!(
                messages,
                vec![
                    EngineMessage::Connect,
                    EngineMessage::ProgramLoaded("main.js".to_string()),
                ],
                "chunk size {chunk_size}"
            );
        }
    }

    #[tokio::test]
    async fn resynchronizes_after_garbage() {
        let mut frames = BytesMut::new();
        frames.put(&b"not a length prefix\n"[..]);
        frames.put(&construct_frame(&serde_json::json!({"type": "connect"}))[..]);

        let mut framed_read = FramedRead::new(&frames[..], FrameCodec::<EngineMessage>::new());
        let msg = framed_read.next().await.unwrap().unwrap();
        assert_eq!(msg, EngineMessage::Connect);
    }

    #[tokio::test]
    async fn discards_ill_formed_payload() {
        let mut frames = BytesMut::new();
        frames.put(&b"7\nnot-js\n"[..]);
        frames.put(&construct_frame(&serde_json::json!({"type": "stopOnStep"}))[..]);

        let mut framed_read = FramedRead::new(&frames[..], FrameCodec::<EngineMessage>::new());
        let msg = framed_read.next().await.unwrap().unwrap();
        assert_eq!(msg, EngineMessage::StopOnStep);
    }

    #[tokio::test]
    async fn unknown_tag_is_dropped() {
        let mut frames = BytesMut::new();
        frames.put(&construct_frame(&serde_json::json!({"type": "fullSpeedAhead"}))[..]);
        frames.put(&construct_frame(&serde_json::json!({"type": "connect"}))[..]);

        let mut framed_read = FramedRead::new(&frames[..], FrameCodec::<EngineMessage>::new());
        let msg = framed_read.next().await.unwrap().unwrap();
        assert_eq!(msg, EngineMessage::Connect);
    }

    #[tokio::test]
    async fn overlong_payload_truncates_at_declared_boundary() {
        // three bytes more than declared: the declared prefix parses, the
        // excess carries over into the next frame
        let payload = serde_json::to_string(&serde_json::json!({"type": "connect"})).unwrap();
        let mut frames = BytesMut::new();
        frames.put(format!("{}\n{}   ", payload.len(), payload).as_bytes());
        frames.put(&construct_frame(&serde_json::json!({"type": "stopOnStep"}))[..]);

        let mut framed_read = FramedRead::new(&frames[..], FrameCodec::<EngineMessage>::new());
        assert_eq!(
            framed_read.next().await.unwrap().unwrap(),
            EngineMessage::Connect
        );
        assert_eq!(
            framed_read.next().await.unwrap().unwrap(),
            EngineMessage::StopOnStep
        );
    }

    #[test]
    fn encode_decode_round_trips() {
        let message = EngineMessage::BreakpointSet(Breakpoint {
            id: 17,
            line: 10,
            column: Some(4),
        });
        let frame = encode_frame(&message).unwrap();

        let mut buffer = BytesMut::from(&frame[..]);
        let decoded = FrameCodec::<EngineMessage>::new()
            .decode(&mut buffer)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, message);
        assert!(buffer.is_empty());

        // and the other direction frames identically
        assert_eq!(encode_frame(&decoded).unwrap(), frame);
    }

    #[test]
    fn commands_decode_by_tag() {
        let frame = encode_frame(&serde_json::json!({
            "type": "setVariable",
            "value": {"variablesReference": 4097, "name": "x", "value": 3},
        }))
        .unwrap();
        let mut buffer = BytesMut::from(&frame[..]);
        let decoded = FrameCodec::<Command>::new()
            .decode(&mut buffer)
            .unwrap()
            .unwrap();
        let Command::SetVariable(assignment) = decoded else {
            panic!("expected setVariable, got {decoded:?}");
        };
        assert_eq!(assignment.variables_reference, 4097);
        // raw-encoded scalar arrives as its native type
        assert_eq!(assignment.value, serde_json::json!(3));
    }
}
