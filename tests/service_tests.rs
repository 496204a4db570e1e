//! Service-level functional tests.
//!
//! Drives the session registry, the in-memory demultiplexer, and the
//! process relay service directly, the way the control channel does, and
//! checks what a peer on the other end of a virtual stream observes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fiber_protocol::Parameters;
use fiber_transport::{Demux, MemoryDemux};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

/// Poll `cond` until it holds or five seconds pass.
async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn port_params(value: &str) -> Parameters {
    let mut params = Parameters::new();
    params.insert("local_port".into(), value.into());
    params
}

// ─────────────────────────────────────────────────────────────────────────────
// Session registry
// ─────────────────────────────────────────────────────────────────────────────

mod registry {
    use super::*;
    use fiber_services::{Session, SessionRegistry};

    #[derive(Default)]
    struct Tally {
        stops: AtomicUsize,
    }

    impl Session for Tally {
        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn insert_assigns_distinct_ids() {
        let reg = SessionRegistry::<Tally>::new();
        let a = reg.insert(Arc::new(Tally::default()));
        let b = reg.insert(Arc::new(Tally::default()));
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.ids(), vec![a, b]);
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = SessionRegistry::<Tally>::new();
        let id = reg.insert(Arc::new(Tally::default()));
        assert!(reg.remove(id).is_some());
        assert!(reg.remove(id).is_none());
        assert!(reg.is_empty());
        assert!(!reg.contains(id));
    }

    #[tokio::test]
    async fn stop_all_stops_each_session_once() {
        let reg = SessionRegistry::<Tally>::new();
        let tallies: Vec<_> = (0..3).map(|_| Arc::new(Tally::default())).collect();
        for tally in &tallies {
            reg.insert(tally.clone());
        }

        reg.stop_all().await;
        assert!(reg.is_empty());
        assert!(reg.is_closed());
        for tally in &tallies {
            assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
        }

        // A second call finds nothing to stop
        reg.stop_all().await;
        for tally in &tallies {
            assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn removed_session_is_not_stopped_by_stop_all() {
        let reg = SessionRegistry::<Tally>::new();
        let gone = Arc::new(Tally::default());
        let id = reg.insert(gone.clone());
        reg.remove(id);

        reg.stop_all().await;
        assert_eq!(gone.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sessions_created_after_stop_all_start_cancelled() {
        let reg = SessionRegistry::<Tally>::new();
        let before = reg.shutdown_token().child_token();
        assert!(!before.is_cancelled());

        reg.stop_all().await;
        assert!(before.is_cancelled());
        assert!(reg.shutdown_token().child_token().is_cancelled());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory demux
// ─────────────────────────────────────────────────────────────────────────────

mod demux {
    use super::*;
    use fiber_transport::{Acceptor, DemuxError};

    #[tokio::test]
    async fn bind_twice_is_port_in_use() {
        let demux = MemoryDemux::new();
        let _acceptor = demux.bind(100).unwrap();
        assert!(matches!(demux.bind(100), Err(DemuxError::PortInUse(100))));
    }

    #[tokio::test]
    async fn connect_to_unbound_port_is_refused() {
        let demux = MemoryDemux::new();
        assert!(matches!(
            demux.connect(7).await,
            Err(DemuxError::ConnectionRefused(7))
        ));
    }

    #[tokio::test]
    async fn dropping_acceptor_releases_port() {
        let demux = MemoryDemux::new();
        let acceptor = demux.bind(100).unwrap();
        assert_eq!(acceptor.local_port(), 100);
        assert!(demux.is_bound(100));

        drop(acceptor);
        assert!(!demux.is_bound(100));
        assert!(demux.bind(100).is_ok());
    }

    #[tokio::test]
    async fn connected_streams_carry_bytes_both_ways() {
        let demux = MemoryDemux::new();
        let mut acceptor = demux.bind(5).unwrap();

        let mut client = demux.connect(5).await.unwrap();
        let mut server = acceptor.accept().await.unwrap();

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn shutdown_fails_pending_accepts() {
        let demux = MemoryDemux::new();
        let mut acceptor = demux.bind(5).unwrap();

        demux.shutdown();
        let err = acceptor.accept().await.unwrap_err();
        assert!(matches!(err, DemuxError::Closed));
        assert!(!err.is_transient());
        assert!(matches!(demux.bind(6), Err(DemuxError::Closed)));
    }

    #[test]
    fn io_resets_are_transient() {
        let reset = DemuxError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(reset.is_transient());
        let denied = DemuxError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!denied.is_transient());
        assert!(DemuxError::Aborted.is_aborted());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process relay: creation
// ─────────────────────────────────────────────────────────────────────────────

mod creation {
    use super::*;
    use fiber_protocol::ServiceState;
    use fiber_services::CreationError;
    use fiber_services::process::{MicroserviceServer, ProcessLaunch};

    #[test]
    fn missing_port_parameter_is_rejected() {
        let demux = Arc::new(MemoryDemux::new());
        let err = MicroserviceServer::create(demux, &Parameters::new(), "/bin/cat", "")
            .err()
            .unwrap();
        assert!(matches!(err, CreationError::MissingParameter("local_port")));
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let demux = Arc::new(MemoryDemux::new());
        let err = MicroserviceServer::create(demux, &port_params("eighty"), "/bin/cat", "")
            .err()
            .unwrap();
        assert!(matches!(err, CreationError::InvalidParameter { key: "local_port", .. }));
    }

    #[test]
    fn empty_binary_path_is_rejected() {
        let demux = Arc::new(MemoryDemux::new());
        let err = MicroserviceServer::create(demux, &port_params("80"), "", "")
            .err()
            .unwrap();
        assert!(matches!(err, CreationError::EmptyBinaryPath));
    }

    #[test]
    fn create_does_not_bind() {
        let demux = Arc::new(MemoryDemux::new());
        let server = MicroserviceServer::create(demux.clone(), &port_params("80"), "/bin/cat", "-u")
            .unwrap();
        assert_eq!(server.local_port(), 80);
        assert_eq!(server.state(), ServiceState::Created);
        assert!(!demux.is_bound(80));
        assert_eq!(server.launch().args, vec!["-u".to_string()]);
    }

    #[test]
    fn create_request_carries_port_parameter() {
        let request = MicroserviceServer::<MemoryDemux>::create_request(4242);
        assert_eq!(request.service_id, fiber_services::process::SERVICE_ID);
        assert_eq!(request.parameter("local_port"), Some("4242"));
    }

    #[test]
    fn launch_args_split_on_whitespace() {
        let launch = ProcessLaunch::new("/bin/echo", "  a   b\tc ");
        assert_eq!(launch.args, vec!["a", "b", "c"]);
        assert!(ProcessLaunch::new("/bin/echo", "").args.is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process relay: lifecycle and sessions
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
mod relay {
    use super::*;
    use fiber_protocol::ServiceState;
    use fiber_services::ServiceError;
    use std::sync::atomic::AtomicU32;

    use fiber_services::process::{
        MicroserviceServer, ProcessLaunch, SpawnedProcess, Spawner, platform_spawner,
    };
    use fiber_transport::{Acceptor, DemuxError, MemoryAcceptor};
    use tokio::io::DuplexStream;

    fn running(
        demux: &Arc<MemoryDemux>,
        port: u32,
        path: &str,
        args: &str,
    ) -> MicroserviceServer<MemoryDemux> {
        let server =
            MicroserviceServer::create(demux.clone(), &port_params(&port.to_string()), path, args)
                .unwrap();
        server.start().unwrap();
        server
    }

    async fn read_all(stream: &mut (impl AsyncReadExt + Unpin)) -> Vec<u8> {
        let mut out = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
            .await
            .expect("stream was not closed")
            .unwrap();
        out
    }

    #[tokio::test]
    async fn echo_output_then_close() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9001, "/bin/echo", "hello world");

        let mut stream = demux.connect(9001).await.unwrap();
        assert_eq!(read_all(&mut stream).await, b"hello world\n");

        assert!(eventually(|| server.session_count() == 0).await);
        assert_eq!(server.state(), ServiceState::Running);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cat_round_trip_then_stop_closes_stream() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9002, "/bin/cat", "");

        let mut stream = demux.connect(9002).await.unwrap();
        stream.write_all(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"ping\n");
        assert!(eventually(|| server.session_count() == 1).await);

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServiceState::Stopped);
        assert_eq!(server.session_count(), 0);
        assert!(read_all(&mut stream).await.is_empty());
        assert!(!demux.is_bound(9002));
    }

    #[tokio::test]
    async fn half_close_flushes_process_output() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9003, "/bin/cat", "");

        let mut stream = demux.connect(9003).await.unwrap();
        stream.write_all(b"abc").await.unwrap();
        stream.shutdown().await.unwrap();

        assert_eq!(read_all(&mut stream).await, b"abc");
        assert!(eventually(|| server.session_count() == 0).await);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_streams_get_their_own_process() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9004, "/bin/cat", "");

        let mut streams = Vec::new();
        for _ in 0..3 {
            streams.push(demux.connect(9004).await.unwrap());
        }
        assert!(eventually(|| server.session_count() == 3).await);

        for (i, stream) in streams.iter_mut().enumerate() {
            stream.write_all(format!("stream-{i}\n").as_bytes()).await.unwrap();
        }
        for (i, stream) in streams.iter_mut().enumerate() {
            let expected = format!("stream-{i}\n");
            let mut buf = vec![0u8; expected.len()];
            timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, expected.as_bytes());
        }

        // Closing one stream ends only its own session
        let mut first = streams.remove(0);
        first.shutdown().await.unwrap();
        assert!(read_all(&mut first).await.is_empty());
        assert!(eventually(|| server.session_count() == 2).await);

        server.stop().await.unwrap();
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn spawn_failure_closes_only_that_stream() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9005, "/nonexistent/fiberlink-test-binary", "");

        let mut stream = demux.connect(9005).await.unwrap();
        assert!(read_all(&mut stream).await.is_empty());
        assert!(eventually(|| server.session_count() == 0).await);

        // The service keeps accepting
        assert_eq!(server.state(), ServiceState::Running);
        let mut again = demux.connect(9005).await.unwrap();
        assert!(read_all(&mut again).await.is_empty());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_releases_port_for_rebinding() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9006, "/bin/cat", "");
        assert!(demux.is_bound(9006));

        server.stop().await.unwrap();
        assert!(!demux.is_bound(9006));

        let replacement = running(&demux, 9006, "/bin/cat", "");
        assert_eq!(replacement.state(), ServiceState::Running);
        replacement.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9007, "/bin/cat", "");
        let _stream = demux.connect(9007).await.unwrap();
        assert!(eventually(|| server.session_count() == 1).await);

        // The second caller finds the first one mid-teardown and must
        // still observe a fully stopped service once it returns.
        let second = async {
            server.stop().await.unwrap();
            (server.state(), server.session_count(), demux.is_bound(9007))
        };
        let (first, seen) = tokio::join!(server.stop(), second);
        first.unwrap();
        assert_eq!(seen, (ServiceState::Stopped, 0, false));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn stop_racing_failed_accept_waits_for_teardown() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9015, "/bin/cat", "");
        let _stream = demux.connect(9015).await.unwrap();
        assert!(eventually(|| server.session_count() == 1).await);

        demux.shutdown();
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServiceState::Stopped);
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn dropping_running_server_releases_port_and_sessions() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9013, "/bin/cat", "");
        let mut stream = demux.connect(9013).await.unwrap();
        assert!(eventually(|| server.session_count() == 1).await);

        drop(server);
        assert!(eventually(|| !demux.is_bound(9013)).await);
        assert!(read_all(&mut stream).await.is_empty());
    }

    /// Records the pid of the last child it spawned.
    struct PidRecorder {
        pid: AtomicU32,
    }

    impl Spawner for PidRecorder {
        fn spawn(&self, launch: &ProcessLaunch) -> std::io::Result<SpawnedProcess> {
            let process = platform_spawner().spawn(launch)?;
            self.pid.store(process.child.id().unwrap_or(0), Ordering::SeqCst);
            Ok(process)
        }
    }

    fn is_alive(pid: u32) -> bool {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -0 {pid} 2>/dev/null"))
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn stop_kills_process_that_ignores_input_eof() {
        let demux = Arc::new(MemoryDemux::new());
        let recorder = Arc::new(PidRecorder {
            pid: AtomicU32::new(0),
        });
        let server = MicroserviceServer::create(demux.clone(), &port_params("9016"), "/bin/sleep", "100")
            .unwrap()
            .with_spawner(recorder.clone());
        server.start().unwrap();

        let mut stream = demux.connect(9016).await.unwrap();
        stream.shutdown().await.unwrap();
        assert!(eventually(|| recorder.pid.load(Ordering::SeqCst) != 0).await);
        let pid = recorder.pid.load(Ordering::SeqCst);
        assert!(is_alive(pid));

        // Closing stdin does not end a process that never reads it
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.session_count(), 1);

        server.stop().await.unwrap();
        assert!(!is_alive(pid));
        assert!(read_all(&mut stream).await.is_empty());
    }

    /// Memory demux whose acceptors report a few connection resets first.
    struct ResettingDemux {
        inner: MemoryDemux,
        resets: usize,
    }

    struct ResettingAcceptor {
        inner: MemoryAcceptor,
        resets: usize,
    }

    impl Acceptor for ResettingAcceptor {
        type Stream = DuplexStream;

        fn local_port(&self) -> u32 {
            self.inner.local_port()
        }

        async fn accept(&mut self) -> Result<DuplexStream, DemuxError> {
            if self.resets > 0 {
                self.resets -= 1;
                return Err(DemuxError::Io(std::io::ErrorKind::ConnectionReset.into()));
            }
            self.inner.accept().await
        }
    }

    impl Demux for ResettingDemux {
        type Stream = DuplexStream;
        type Acceptor = ResettingAcceptor;

        fn bind(&self, port: u32) -> Result<ResettingAcceptor, DemuxError> {
            Ok(ResettingAcceptor {
                inner: self.inner.bind(port)?,
                resets: self.resets,
            })
        }

        async fn connect(&self, port: u32) -> Result<DuplexStream, DemuxError> {
            self.inner.connect(port).await
        }
    }

    #[tokio::test]
    async fn transient_accept_errors_keep_service_running() {
        let demux = Arc::new(ResettingDemux {
            inner: MemoryDemux::new(),
            resets: 2,
        });
        let server = MicroserviceServer::create(demux.clone(), &port_params("9014"), "/bin/cat", "")
            .unwrap();
        server.start().unwrap();

        let mut stream = demux.connect(9014).await.unwrap();
        stream.write_all(b"after reset\n").await.unwrap();
        let mut buf = [0u8; 12];
        timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"after reset\n");
        assert_eq!(server.state(), ServiceState::Running);

        server.stop().await.unwrap();
        assert!(!demux.inner.is_bound(9014));
    }

    #[tokio::test]
    async fn bind_conflict_fails_start() {
        let demux = Arc::new(MemoryDemux::new());
        let _holder = demux.bind(9008).unwrap();

        let server = MicroserviceServer::create(demux.clone(), &port_params("9008"), "/bin/cat", "")
            .unwrap();
        let err = server.start().unwrap_err();
        assert!(matches!(err, ServiceError::Bind { port: 9008, .. }));
        assert_eq!(server.state(), ServiceState::Stopped);
        assert!(server.bind_error().is_some());

        // Stopping a failed service is a no-op
        server.stop().await.unwrap();
        assert!(demux.is_bound(9008));
    }

    #[tokio::test]
    async fn second_service_on_same_port_fails() {
        let demux = Arc::new(MemoryDemux::new());
        let first = running(&demux, 4000, "/bin/cat", "");

        let second = MicroserviceServer::create(demux.clone(), &port_params("4000"), "/bin/echo", "")
            .unwrap();
        assert!(matches!(second.start(), Err(ServiceError::Bind { port: 4000, .. })));
        assert_eq!(second.state(), ServiceState::Stopped);
        assert_eq!(first.state(), ServiceState::Running);

        // Streams still reach the first service
        let mut stream = demux.connect(4000).await.unwrap();
        stream.write_all(b"first\n").await.unwrap();
        let mut buf = [0u8; 6];
        timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"first\n");

        first.stop().await.unwrap();
    }

    /// Fails every other spawn.
    struct FlakySpawner {
        calls: AtomicUsize,
    }

    impl Spawner for FlakySpawner {
        fn spawn(&self, launch: &ProcessLaunch) -> std::io::Result<SpawnedProcess> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
            }
            platform_spawner().spawn(launch)
        }
    }

    #[tokio::test]
    async fn failing_session_leaves_others_running() {
        let demux = Arc::new(MemoryDemux::new());
        let server = MicroserviceServer::create(demux.clone(), &port_params("9012"), "/bin/cat", "")
            .unwrap()
            .with_spawner(Arc::new(FlakySpawner {
                calls: AtomicUsize::new(0),
            }));
        server.start().unwrap();

        let mut failed = demux.connect(9012).await.unwrap();
        assert!(read_all(&mut failed).await.is_empty());

        let mut healthy = demux.connect(9012).await.unwrap();
        healthy.write_all(b"ok\n").await.unwrap();
        let mut buf = [0u8; 3];
        timeout(Duration::from_secs(5), healthy.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"ok\n");

        assert!(eventually(|| server.session_count() == 1).await);
        assert_eq!(server.state(), ServiceState::Running);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9009, "/bin/cat", "");
        assert!(matches!(
            server.start(),
            Err(ServiceError::InvalidState(ServiceState::Running))
        ));
        server.stop().await.unwrap();
        assert!(matches!(
            server.start(),
            Err(ServiceError::InvalidState(ServiceState::Stopped))
        ));
    }

    #[tokio::test]
    async fn stop_before_start_never_binds() {
        let demux = Arc::new(MemoryDemux::new());
        let server = MicroserviceServer::create(demux.clone(), &port_params("9010"), "/bin/cat", "")
            .unwrap();
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServiceState::Stopped);
        assert!(server.start().is_err());
        assert!(!demux.is_bound(9010));
    }

    #[tokio::test]
    async fn demux_shutdown_stops_service() {
        let demux = Arc::new(MemoryDemux::new());
        let server = running(&demux, 9011, "/bin/cat", "");
        let mut stream = demux.connect(9011).await.unwrap();
        assert!(eventually(|| server.session_count() == 1).await);

        demux.shutdown();
        assert!(eventually(|| server.state() == ServiceState::Stopped).await);
        assert_eq!(server.session_count(), 0);
        assert!(read_all(&mut stream).await.is_empty());

        // An explicit stop afterwards has nothing left to do
        server.stop().await.unwrap();
    }
}
