//! Line-echo server driving the connection core from a `poll(2)` loop.
//!
//! ```bash
//! RUST_LOG=alpaca_core=debug cargo run --example echo_server
//! nc 127.0.0.1 7000
//! ```

use alpaca_core::{
    ConnFlags, Connection, Endpoints, OutputWindow, Server, ServerConfig, ServerHooks,
};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::time::Instant;

const IDLE_TIMEOUT_SECS: f64 = 30.0;

struct Echo;

impl ServerHooks for Echo {
    fn on_join(&self, conn: &mut Connection) -> bool {
        let _ = conn.write_str("welcome to alpaca echo\n");
        true
    }

    fn on_leave(&self, conn: &mut Connection) {
        tracing::info!(conn = %conn.id(), ip = conn.ip_address().unwrap_or("-"), "client left");
    }

    fn on_pre_write(&self, output: &mut OutputWindow<'_>) {
        tracing::trace!(conn = %output.conn_id(), bytes = output.len(), "staging output");
    }

    fn on_timeout(&self, conn: &mut Connection) {
        let _ = conn.write_str("idle timeout\n");
        conn.close();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    alpaca_core::logging::init_logging();

    let server = Server::new(ServerConfig::from_env())?.hooks(Echo);
    let listener = TcpListener::bind("127.0.0.1:7000")?;
    listener.set_nonblocking(true)?;
    tracing::info!("echo server listening on 127.0.0.1:7000");

    let mut scratch = vec![0u8; server.config().read_chunk_size];

    loop {
        let ids = server.ids();
        let mut pollfds = vec![
            libc::pollfd {
                fd: listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: server.waker().read_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        {
            let guard = server.lock();
            for id in &ids {
                let Some(conn) = guard.get(*id) else { continue };
                let mut events = libc::POLLIN;
                if conn.write_state() != alpaca_core::WriteState::Idle {
                    events |= libc::POLLOUT;
                }
                let fd = conn.endpoints().input.unwrap_or(-1);
                pollfds.push(libc::pollfd { fd, events, revents: 0 });
            }
        }

        let timeout_ms = server
            .poll_timeout(Instant::now())
            .map_or(-1, |d| d.as_millis().min(i32::MAX as u128) as i32);
        let nfds = pollfds.len() as libc::nfds_t;
        let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err.into());
            }
            continue;
        }

        if pollfds[0].revents & libc::POLLIN != 0 {
            while let Ok((stream, addr)) = listener.accept() {
                stream.set_nonblocking(true)?;
                let endpoints = Endpoints::duplex(stream.into_raw_fd());
                match server.create(endpoints, Some(addr), ConnFlags::empty()) {
                    Ok(Some(id)) => {
                        server.set_timeout(id, IDLE_TIMEOUT_SECS);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "dropping incoming connection"),
                }
            }
        }
        if pollfds[1].revents != 0 {
            server.waker().drain();
        }

        for (id, pfd) in ids.iter().zip(&pollfds[2..]) {
            if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                match server.read_from_socket(*id) {
                    Ok(_) => {
                        let n = server.read(*id, &mut scratch);
                        let _ = server.write(*id, &scratch[..n]);
                        server.set_timeout(*id, IDLE_TIMEOUT_SECS);
                    }
                    Err(e) if e.is_would_block() => {}
                    Err(_) => {
                        server.close(*id);
                    }
                }
            }

            server.stage_output(*id);
            match server.drain_to_socket(*id) {
                Err(e) if !e.is_would_block() => {
                    server.close(*id);
                }
                _ => {}
            }
        }

        server.expire_timeouts(Instant::now());

        let closing = server.lock().closing();
        for id in closing {
            server.free(id);
        }
    }
}
