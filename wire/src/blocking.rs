//! Blocking frame reader/writer for the engine side of the protocol. The
//! in-process debug engine blocks the target while paused, so it reads and
//! writes frames synchronously instead of pulling an async runtime into the
//! target process.
use std::io::{self, BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct FrameReader<R> {
    input: R,
}

impl<R> FrameReader<R>
where
    R: BufRead,
{
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Blocks until a full frame has been received and parsed. Malformed
    /// length prefixes and ill-formed payloads are logged and skipped;
    /// `Ok(None)` means the peer closed the stream.
    pub fn read_message<T>(&mut self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        loop {
            let mut prefix = String::new();
            let read_size = self.input.read_line(&mut prefix)?;
            if read_size == 0 {
                return Ok(None);
            }

            let declared: usize = match prefix.trim().parse() {
                Ok(declared) => declared,
                Err(_) => {
                    tracing::warn!(
                        prefix = %prefix.trim_end(),
                        "expected length prefix, discarding line"
                    );
                    continue;
                }
            };

            let mut payload = vec![0; declared];
            self.input.read_exact(payload.as_mut_slice())?;

            match serde_json::from_slice(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "discarding ill-formed frame"
                    );
                }
            }
        }
    }
}

pub struct FrameWriter<W> {
    output: W,
}

impl<W> FrameWriter<W>
where
    W: Write,
{
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn write_message<T>(&mut self, message: &T) -> io::Result<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write!(self.output, "{}\n", payload.len())?;
        self.output.write_all(&payload)?;
        self.output.flush()
    }
}
