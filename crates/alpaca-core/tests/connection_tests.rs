use alpaca_core::{
    AlpacaError, ConnFlags, Connection, Endpoints, Server, ServerConfig, ServerHooks,
};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn server() -> Server {
    Server::new(ServerConfig::default().reverse_dns(false)).unwrap()
}

/// Socket pair: the first end is handed to the server (non-blocking), the
/// second stays with the test as the peer.
fn socket_pair() -> (i32, UnixStream) {
    let (local, peer) = UnixStream::pair().unwrap();
    local.set_nonblocking(true).unwrap();
    (local.into_raw_fd(), peer)
}

fn fd_is_open(fd: i32) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

struct Veto;

impl ServerHooks for Veto {
    fn on_join(&self, _conn: &mut Connection) -> bool {
        false
    }
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl ServerHooks for Recorder {
    fn on_join(&self, conn: &mut Connection) -> bool {
        self.events.lock().push(format!("join {}", conn.id()));
        true
    }

    fn on_leave(&self, conn: &mut Connection) {
        let queued = String::from_utf8_lossy(conn.output().pending()).into_owned();
        self.events.lock().push(format!("leave {} {:?}", conn.id(), queued));
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ═══ Creation ═══

#[test]
fn test_create_links_newest_first() {
    let server = server();
    let a = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    let b = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    assert_eq!(server.ids(), vec![b, a]);
    assert_eq!(server.len(), 2);
    assert_eq!(server.metrics().active_conns, 2);
}

#[test]
fn test_join_veto_leaves_list_unchanged() {
    let server = server().hooks(Veto);
    let (fd, mut peer) = socket_pair();

    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap();
    assert!(id.is_none());
    assert!(server.is_empty());
    assert_eq!(server.metrics().rejected_conns, 1);
    assert_eq!(server.metrics().active_conns, 0);

    // The rejected connection's socket was closed
    let mut buf = [0u8; 4];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_peer_address_metadata() {
    let server = server();
    let addr = "127.0.0.1:5555".parse().unwrap();
    let id = server.create(Endpoints::none(), Some(addr), ConnFlags::empty()).unwrap().unwrap();

    let guard = server.lock();
    let conn = guard.get(id).unwrap();
    assert_eq!(conn.ip_address(), Some("127.0.0.1"));
    assert_eq!(conn.hostname(), None);
    assert_eq!(conn.peer().unwrap().addr, addr);
}

#[test]
fn test_slab_full() {
    let config = ServerConfig::default().reverse_dns(false).max_connections(1);
    let server = Server::new(config).unwrap();
    server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap();
    let err = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap_err();
    assert!(matches!(err, AlpacaError::SlabFull { capacity: 1 }));
}

// ═══ Close / free ═══

#[test]
fn test_close_is_idempotent() {
    let server = server();
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    assert!(server.close(id));
    assert!(!server.close(id));
    assert_eq!(server.lock().closing(), vec![id]);
}

#[test]
fn test_write_on_closing_connection_is_noop() {
    let server = server();
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    server.write(id, b"before").unwrap();
    server.close(id);

    assert_eq!(server.write(id, b"after").unwrap(), 0);
    assert_eq!(server.write_str(id, "after").unwrap(), 0);
    let guard = server.lock();
    assert_eq!(guard.get(id).unwrap().output().pending(), b"before");
}

#[test]
fn test_empty_write_is_noop() {
    let server = server();
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    assert_eq!(server.write(id, b"").unwrap(), 0);
    assert!(!server.lock().get(id).unwrap().flags().contains(ConnFlags::WROTE));
}

#[test]
fn test_free_runs_hooks_and_flushes() {
    let recorder = Recorder::default();
    let server = server().hooks(recorder.clone());
    let (fd, mut peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    server.write_str(id, "bye").unwrap();
    assert!(server.free(id));
    assert!(!server.free(id));
    assert!(server.is_empty());

    let events = recorder.events.lock().clone();
    assert_eq!(events, vec![format!("join {}", id), format!("leave {} \"bye\"", id)]);

    // Final flush arrived, then the socket was closed
    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"bye");
}

#[test]
fn test_free_destroys_extensions() {
    let server = server();
    let drops = Arc::new(AtomicUsize::new(0));
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();

    server.with_connection(id, |c| {
        c.attach("session", DropCounter(drops.clone()));
        c.attach("stats", DropCounter(drops.clone()));
        assert!(c.extension::<DropCounter>("session").is_some());
    });
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    server.free(id);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn test_server_drop_frees_connections() {
    let recorder = Recorder::default();
    let server = server().hooks(recorder.clone());
    let drops = Arc::new(AtomicUsize::new(0));
    let (fd, mut peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    server.with_connection(id, |c| {
        c.attach("session", DropCounter(drops.clone()));
    });
    server.write_str(id, "later").unwrap();
    drop(server);

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    let events = recorder.events.lock().clone();
    assert_eq!(events, vec![format!("join {}", id), format!("leave {} \"later\"", id)]);

    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"later");
}

#[test]
fn test_keep_open_leaves_descriptor() {
    let server = server();
    let (fd, _peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::KEEP_OPEN).unwrap().unwrap();
    server.free(id);

    assert!(fd_is_open(fd));
    unsafe { libc::close(fd) };
}

#[test]
fn test_split_endpoints_closed_separately() {
    let server = server();
    let (in_fd, mut in_peer) = socket_pair();
    let (out_fd, mut out_peer) = socket_pair();
    let id = server
        .create(Endpoints::split(in_fd, out_fd), None, ConnFlags::empty())
        .unwrap()
        .unwrap();

    in_peer.write_all(b"request").unwrap();
    assert_eq!(server.read_from_socket(id).unwrap(), 7);
    server.write(id, b"reply").unwrap();
    assert_eq!(server.stage_output(id), Some(5));
    assert_eq!(server.drain_to_socket(id).unwrap(), 5);

    let mut buf = [0u8; 5];
    out_peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"reply");

    server.free(id);
    let mut rest = Vec::new();
    assert_eq!(in_peer.read_to_end(&mut rest).unwrap(), 0);
    assert_eq!(out_peer.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn test_stale_handle_is_rejected() {
    let server = server();
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    server.free(id);
    let fresh = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();

    assert_eq!(fresh.index(), id.index());
    assert!(matches!(server.write(id, b"x"), Err(AlpacaError::UnknownConnection(_))));
    assert!(!server.close(id));
    assert_eq!(server.lock().get(fresh).unwrap().output().len(), 0);
}

// ═══ Reading ═══

#[test]
fn test_read_from_socket_then_fetch() {
    let server = server();
    let (fd, mut peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    peer.write_all(b"ping").unwrap();
    assert_eq!(server.read_from_socket(id).unwrap(), 4);
    assert_eq!(server.metrics().bytes_read, 4);

    let mut buf = [0u8; 3];
    assert_eq!(server.read(id, &mut buf), 3);
    assert_eq!(&buf, b"pin");
    assert_eq!(server.read(id, &mut buf), 1);
    assert_eq!(buf[0], b'g');
    assert_eq!(server.read(id, &mut buf), 0);
}

#[test]
fn test_read_from_socket_would_block_and_eof() {
    let server = server();
    let (fd, peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    let err = server.read_from_socket(id).unwrap_err();
    assert!(err.is_would_block());

    drop(peer);
    let err = server.read_from_socket(id).unwrap_err();
    assert!(matches!(err, AlpacaError::PeerClosed));
    // Reporting closure does not free the connection
    assert_eq!(server.len(), 1);
}

#[test]
fn test_read_chunk_size_limits_single_read() {
    let config = ServerConfig::default().reverse_dns(false).read_chunk_size(4);
    let server = Server::new(config).unwrap();
    let (fd, mut peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    peer.write_all(b"abcdefgh").unwrap();
    assert_eq!(server.read_from_socket(id).unwrap(), 4);
    assert_eq!(server.read_from_socket(id).unwrap(), 4);

    let mut buf = [0u8; 16];
    assert_eq!(server.read(id, &mut buf), 8);
    assert_eq!(&buf[..8], b"abcdefgh");
}

#[test]
fn test_read_chunk_larger_than_default() {
    let config = ServerConfig::default().reverse_dns(false).read_chunk_size(16 * 1024);
    let server = Server::new(config).unwrap();
    let (fd, mut peer) = socket_pair();
    let id = server.create(Endpoints::duplex(fd), None, ConnFlags::empty()).unwrap().unwrap();

    let payload: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
    peer.write_all(&payload).unwrap();
    assert_eq!(server.read_from_socket(id).unwrap(), payload.len());

    // The shared receive buffer is reused across connections and calls
    peer.write_all(b"tail").unwrap();
    assert_eq!(server.read_from_socket(id).unwrap(), 4);

    let mut buf = vec![0u8; 8192];
    assert_eq!(server.read(id, &mut buf), payload.len() + 4);
    assert_eq!(&buf[..payload.len()], &payload[..]);
    assert_eq!(&buf[payload.len()..payload.len() + 4], b"tail");
}

#[test]
fn test_missing_endpoint() {
    let server = server();
    let id = server.create(Endpoints::none(), None, ConnFlags::empty()).unwrap().unwrap();
    assert!(matches!(server.read_from_socket(id), Err(AlpacaError::NoEndpoint("input"))));
}
