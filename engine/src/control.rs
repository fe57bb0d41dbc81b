//! Control-channel client used by the target runtime host process.
use std::io::{Read, Write};
use std::net::TcpStream;

use wire::{NO_SESSION_REPLY, SESSION_PORT_REQUEST};

/// Ask the bridge's control channel whether a debug session is pending.
///
/// Returns the per-session port to connect to, or `None` when the host
/// should proceed unobstructed: no session is pending, the channel is
/// unreachable, or the reply is malformed.
pub fn poll_session_port(control_port: u16) -> Option<u16> {
    let mut socket = match TcpStream::connect(("127.0.0.1", control_port)) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!(error = %e, "control channel unreachable, continuing without debugging");
            return None;
        }
    };
    if socket.write_all(SESSION_PORT_REQUEST.as_bytes()).is_err() {
        return None;
    }

    let mut buffer = [0u8; 128];
    let read_size = match socket.read(&mut buffer) {
        Ok(0) | Err(_) => return None,
        Ok(read_size) => read_size,
    };
    let reply = String::from_utf8_lossy(&buffer[..read_size]);
    let reply = reply.trim();
    if reply == NO_SESSION_REPLY {
        return None;
    }
    match reply.parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!(%reply, "invalid session port reply, continuing without debugging");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn control_server(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for reply in replies {
                let (mut socket, _) = listener.accept().unwrap();
                let mut buffer = [0u8; 64];
                let read_size = socket.read(&mut buffer).unwrap();
                assert_eq!(
                    String::from_utf8_lossy(&buffer[..read_size]),
                    SESSION_PORT_REQUEST
                );
                socket.write_all(reply.as_bytes()).unwrap();
            }
        });
        port
    }

    #[test]
    fn no_session_and_port_replies() {
        let port = control_server(vec!["no-session", "40123", "eleventy"]);
        assert_eq!(poll_session_port(port), None);
        assert_eq!(poll_session_port(port), Some(40123));
        // malformed replies mean "continue without debugging"
        assert_eq!(poll_session_port(port), None);
    }

    #[test]
    fn unreachable_channel_is_not_an_error() {
        // a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert_eq!(poll_session_port(port), None);
    }
}
