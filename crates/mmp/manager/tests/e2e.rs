use std::sync::Arc;
use std::time::Duration;

use mmp_client::{ClientConfig, ClientError, MmpClient};
use mmp_manager::config::parse_model;
use mmp_manager::proto::{Conduit, ErrorCode, InstanceId, LogLevel, LogMessage, SettingValue, Timestamp};
use mmp_manager::{Logger, MmpServer, ServerConfig, StreamSink, ipc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MODEL: &str = r#"
name = "macro_micro"

[elements]
macro = "macro_implementation"
micro = { implementation = "micro_implementation", multiplicity = 10 }

[conduits]
"macro.out" = "micro.in"
"micro.out" = "macro.in"

[settings]
test1 = 13
test2 = 13.3
test3 = "testing"
test4 = true
test5 = [2.3, 5.6]
test6 = [[1.0, 2.0], [3.0, 1.0]]
"#;

struct Manager {
	addr: String,
	server: Arc<MmpServer>,
	shutdown: CancellationToken,
	serving: JoinHandle<std::io::Result<()>>,
	records: UnboundedReceiver<mmp_manager::LogRecord>,
}

async fn spawn_manager() -> Manager {
	let _ = tracing_subscriber::fmt::try_init();
	let model = parse_model(MODEL).unwrap();
	let (sink, records) = StreamSink::channel();
	let server = MmpServer::new(&model, Logger::new().with_sink(sink), ServerConfig::default()).unwrap();

	let listener = ipc::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap().to_string();
	let shutdown = CancellationToken::new();
	let serving = tokio::spawn(ipc::serve(listener, server.clone(), shutdown.clone()));

	Manager {
		addr,
		server,
		shutdown,
		serving,
		records,
	}
}

fn id(s: &str) -> InstanceId {
	s.parse().unwrap()
}

fn client(addr: &str) -> MmpClient {
	MmpClient::new(addr, ClientConfig {
		request_timeout: Some(Duration::from_secs(5)),
		..ClientConfig::default()
	})
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn macro_micro_run_from_register_to_completion() {
	let mut manager = spawn_manager().await;
	let to_micro = Conduit::new("macro.out", "micro.in").unwrap();

	let macro_client = client(&manager.addr);
	macro_client
		.register_instance(&id("macro"), vec!["tcp:127.0.0.1:10000".into()])
		.await
		.unwrap();
	let macro_peers = {
		let to_micro = to_micro.clone();
		tokio::spawn(async move {
			let peers = macro_client.request_peers(&id("macro"), &[to_micro]).await;
			(macro_client, peers)
		})
	};

	let mut micros = Vec::new();
	for i in 0..10 {
		let addr = manager.addr.clone();
		micros.push(tokio::spawn(async move {
			let me = id(&format!("micro[{i}]"));
			let client = client(&addr);
			client
				.register_instance(&me, vec![format!("tcp:127.0.0.1:{}", 10100 + i)])
				.await
				.unwrap();
			let peers = client.request_peers(&me, &[]).await.unwrap();
			assert_eq!(peers.peers.len(), 2);
			assert!(peers.peers.iter().all(|p| p.instance == id("macro")));
			assert_eq!(peers.locations(&id("macro")), Some(&["tcp:127.0.0.1:10000".to_string()][..]));
			client
		}));
	}
	let mut micro_clients = Vec::new();
	for task in micros {
		micro_clients.push(task.await.unwrap());
	}

	let (macro_client, peers) = tokio::time::timeout(Duration::from_secs(5), macro_peers)
		.await
		.expect("macro never got its peers")
		.unwrap();
	let peers = peers.unwrap();
	assert_eq!(peers.conduits, vec![to_micro]);
	assert_eq!(peers.peer_dims.get("micro"), Some(&vec![10]));
	let got: Vec<_> = peers.peers.iter().map(|p| p.instance.clone()).collect();
	let want: Vec<_> = (0..10).map(|i| id(&format!("micro[{i}]"))).collect();
	assert_eq!(got, want);
	assert_eq!(
		peers.locations(&id("micro[7]")),
		Some(&["tcp:127.0.0.1:10107".to_string()][..])
	);

	assert_eq!(macro_client.get_setting("test1").await.unwrap(), SettingValue::Int(13));
	assert_eq!(macro_client.get_setting_as::<f64>("test2").await.unwrap(), 13.3);
	assert_eq!(macro_client.get_setting_as::<String>("test3").await.unwrap(), "testing");
	assert!(macro_client.get_setting_as::<bool>("test4").await.unwrap());
	assert_eq!(macro_client.get_setting_as::<Vec<f64>>("test5").await.unwrap(), vec![2.3, 5.6]);
	assert_eq!(
		macro_client.get_setting_as::<Vec<Vec<f64>>>("test6").await.unwrap(),
		vec![vec![1.0, 2.0], vec![3.0, 1.0]]
	);
	assert_eq!(macro_client.get_settings().await.unwrap().len(), 6);
	let err = macro_client.get_setting("test7").await.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::UnknownKey));

	macro_client
		.submit_log_message(LogMessage::new(
			"test_logging",
			Timestamp(2.0),
			LogLevel::Debug,
			"Integration testing",
		))
		.await
		.unwrap();
	let record = manager.records.recv().await.unwrap();
	assert_eq!(record.name, "test_logging");
	assert_eq!(record.time_stamp, "1970-01-01T00:00:02Z");
	assert_eq!(record.levelname, "DEBUG");
	assert_eq!(record.message, "Integration testing");

	for (i, client) in micro_clients.iter().enumerate() {
		client.deregister_instance(&id(&format!("micro[{i}]"))).await.unwrap();
	}
	macro_client.deregister_instance(&id("macro")).await.unwrap();
	tokio::time::timeout(Duration::from_secs(5), manager.server.wait_run_complete())
		.await
		.expect("run did not complete");
	assert!(manager.server.registry().is_empty());

	drop(micro_clients);
	drop(macro_client);
	manager.shutdown.cancel();
	manager.serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_fails_a_pending_peer_request() {
	let manager = spawn_manager().await;

	let macro_client = client(&manager.addr);
	macro_client
		.register_instance(&id("macro"), vec!["tcp:127.0.0.1:10000".into()])
		.await
		.unwrap();
	let pending = tokio::spawn(async move { macro_client.request_peers(&id("macro"), &[]).await });

	while manager.server.registry().pending_waits() == 0 {
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	manager.shutdown.cancel();

	let err = tokio::time::timeout(Duration::from_secs(5), pending)
		.await
		.expect("peer request left hanging")
		.unwrap()
		.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::ShutdownInProgress));
	tokio::time::timeout(Duration::from_secs(5), manager.serving)
		.await
		.expect("serve loop did not stop")
		.unwrap()
		.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_registration_surfaces_without_retry() {
	let manager = spawn_manager().await;

	let first = client(&manager.addr);
	let second = client(&manager.addr);
	first.register_instance(&id("micro[3]"), vec!["tcp:a".into()]).await.unwrap();

	let err = second
		.register_instance(&id("micro[3]"), vec!["tcp:b".into()])
		.await
		.unwrap_err();
	assert!(matches!(err, ClientError::Manager { code: ErrorCode::DuplicateRegistration, .. }), "{err}");
	assert!(err.to_string().contains("micro[3]"));

	let err = second
		.request_peers(&id("micro[4]"), &[])
		.await
		.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::NotRegistered));

	let err = second
		.register_instance(&id("micro[10]"), vec!["tcp:c".into()])
		.await
		.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::MultiplicityMismatch));

	assert_eq!(
		manager.server.registry().get(&id("micro[3]")).map(|e| e.locations),
		Some(vec!["tcp:a".to_string()])
	);
	manager.shutdown.cancel();
}
