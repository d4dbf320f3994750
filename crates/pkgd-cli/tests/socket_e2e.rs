//! End-to-end tests: a real daemon socket served in-process, driven through
//! `PkgdClient`.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pkgd_cli::{ClientError, PkgdClient};
use pkgd_core::ipc::{FaultCode, ServerFrame, decode_frame};
use pkgd_core::progress::{Notification, TransactionPhase};
use pkgd_core::{DAEMON_VERSION, OperationKind, ReportCategory, ResolveCode};
use pkgd_daemon::auth::PeerCredentialAuthority;
use pkgd_daemon::engine::CatalogFactory;
use pkgd_daemon::server::{ServerConfig, SocketServer};
use pkgd_daemon::{PackageService, ServiceTimeouts};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

struct Daemon {
    dir: TempDir,
    socket: PathBuf,
    service: Arc<PackageService>,
    serve: JoinHandle<()>,
}

impl Daemon {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let catalog = serde_json::json!({
            "config": {"skip_broken": false},
            "repositories": [{"id": "base", "name": "Base", "enabled": true}],
            "available": [
                {"name": "foo", "version": "1.0", "release": "1", "arch": "noarch",
                 "repo": "base", "size": 2048, "requires": ["libfoo"]},
                {"name": "libfoo", "version": "1.0", "release": "1", "arch": "noarch",
                 "repo": "base", "size": 1024}
            ],
            "installed": []
        });
        let catalog_path = dir.path().join("catalog.json");
        std::fs::write(&catalog_path, catalog.to_string()).unwrap();

        let uid = std::fs::metadata(dir.path()).unwrap().uid();
        let factory = CatalogFactory::new(catalog_path, dir.path().join("catalog.lock"));
        let service = Arc::new(PackageService::new(
            Arc::new(PeerCredentialAuthority::new([uid], [])),
            Arc::new(factory),
            ServiceTimeouts::default(),
        ));

        let socket = dir.path().join("run").join("pkgd.sock");
        let server = SocketServer::bind(ServerConfig::new(&socket)).unwrap();
        let serve = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { server.serve(service).await })
        };

        Self {
            dir,
            socket,
            service,
            serve,
        }
    }

    async fn client(&self) -> PkgdClient {
        PkgdClient::connect_with_timeout(&self.socket, Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn catalog(&self) -> &Path {
        self.dir.path()
    }
}

fn assert_fault(result: Result<impl std::fmt::Debug, ClientError>, code: FaultCode) {
    match result {
        Err(ClientError::Fault(fault)) => assert_eq!(fault.code, code, "{fault}"),
        other => panic!("expected {code} fault, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_version_over_socket() {
    let daemon = Daemon::start();
    let mut client = daemon.client().await;
    assert_eq!(client.version().await.unwrap(), DAEMON_VERSION);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_install_with_progress_ends_session() {
    let daemon = Daemon::start();
    let mut client = daemon.client().await;
    client.subscribe().await.unwrap();
    assert!(client.lock().await.unwrap());

    let report = client.stage(OperationKind::Install, "foo").await.unwrap();
    assert_eq!(report.code, ResolveCode::Ok);
    let categories: Vec<ReportCategory> = report.groups.iter().map(|g| g.category).collect();
    assert_eq!(
        categories,
        vec![ReportCategory::Install, ReportCategory::InstallDeps]
    );
    assert_eq!(report.groups[0].members[0].id.name, "foo");
    assert_eq!(report.groups[1].members[0].id.name, "libfoo");
    let staged = client.take_signals();
    assert!(
        staged.iter().all(|n| matches!(
            n,
            Notification::TransactionEvent {
                event: TransactionPhase::StartBuild | TransactionPhase::EndBuild
            }
        )),
        "{staged:?}"
    );
    assert!(client.take_signals().is_empty());

    let mut phases = Vec::new();
    client
        .run_transaction(|notification| {
            if let Notification::TransactionEvent { event } = notification {
                phases.push(event);
            }
        })
        .await
        .unwrap();

    // Signals travel on their own path and may trail the reply.
    while phases.last() != Some(&TransactionPhase::EndRun) {
        let notification = client.next_signal().await.unwrap();
        if let Notification::TransactionEvent { event } = notification {
            phases.push(event);
        }
    }
    let start = phases
        .iter()
        .position(|p| *p == TransactionPhase::StartRun)
        .unwrap();
    assert!(start < phases.len() - 1);
    assert!(!phases.contains(&TransactionPhase::Fail));

    // The commit released the session, so another caller can take it.
    let mut other = daemon.client().await;
    assert!(other.lock().await.unwrap());
    let installed = other.packages("installed").await.unwrap();
    assert!(installed.iter().any(|id| id.starts_with("foo,")), "{installed:?}");
    assert!(installed.iter().any(|id| id.starts_with("libfoo,")), "{installed:?}");
    assert!(daemon.catalog().join("catalog.json").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_connection_is_locked_out() {
    let daemon = Daemon::start();
    let mut holder = daemon.client().await;
    let mut other = daemon.client().await;

    assert!(holder.lock().await.unwrap());
    assert_fault(other.lock().await, FaultCode::Locked);
    assert_fault(other.repositories("enabled").await, FaultCode::Locked);

    assert_eq!(holder.repositories("enabled").await.unwrap(), vec!["base"]);
    assert!(holder.unlock().await.unwrap());
    assert!(other.lock().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_keeps_session_locked() {
    let daemon = Daemon::start();
    {
        let mut holder = daemon.client().await;
        assert!(holder.lock().await.unwrap());
    }

    let mut other = daemon.client().await;
    assert_fault(other.lock().await, FaultCode::Locked);
    assert!(daemon.service.holder().await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_gets_fault() {
    let daemon = Daemon::start();
    let stream = UnixStream::connect(&daemon.socket).await.unwrap();
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    framed
        .send(Bytes::from_static(b"{\"id\":9,\"call\":{\"method\":\"eval\"}}"))
        .await
        .unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    match decode_frame::<ServerFrame>(&frame).unwrap() {
        ServerFrame::Fault { id, fault } => {
            assert_eq!(id, 0);
            assert_eq!(fault.code, FaultCode::InvalidRequest);
        },
        other => panic!("expected fault, got {other:?}"),
    }

    // The connection stays usable.
    framed
        .send(Bytes::from_static(b"{\"id\":10,\"call\":{\"method\":\"get_version\"}}"))
        .await
        .unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    assert!(matches!(
        decode_frame::<ServerFrame>(&frame).unwrap(),
        ServerFrame::Reply { id: 10, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exit_stops_server() {
    let daemon = Daemon::start();
    let mut client = daemon.client().await;
    assert!(client.exit().await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), daemon.serve)
        .await
        .unwrap()
        .unwrap();
    assert!(!daemon.socket.exists());
}

#[tokio::test]
async fn test_missing_daemon() {
    let dir = TempDir::new().unwrap();
    let err = PkgdClient::connect(&dir.path().join("pkgd.sock"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DaemonNotRunning));
}
