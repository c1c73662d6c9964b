#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use hermod_common::{
    Address, Envelope, Policy, PolicyConfig, Signal,
    users::{AccountConfig, StaticUserDirectory, UsersConfig},
};
use hermod_delivery::{
    CycleReport, DeliveryEngine, DeliveryProcessor, RemoteTransport, TransportError,
};
use hermod_spool::{
    BackingStore, FileBackingStore, MemoryBackingStore, SpoolError, SpooledMessageId,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Remote transport answering from a per-recipient script. Unscripted recipients succeed.
#[derive(Debug, Default)]
struct ScriptedTransport {
    script: Mutex<HashMap<String, TransportError>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn failing(recipient: &str, error: TransportError) -> Arc<Self> {
        let transport = Self::default();
        transport
            .script
            .lock()
            .unwrap()
            .insert(recipient.to_string(), error);
        Arc::new(transport)
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn send(&self, recipient: &Address, _envelope: &Envelope) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(recipient.full());
        self.script
            .lock()
            .unwrap()
            .get(&recipient.full())
            .map_or(Ok(()), |error| Err(error.clone()))
    }
}

/// Spool that refuses new records, so bounces cannot be stored.
#[derive(Debug, Default)]
struct NoNewRecords {
    inner: MemoryBackingStore,
}

#[async_trait]
impl BackingStore for NoNewRecords {
    async fn write(&self, _envelope: &Envelope) -> hermod_spool::Result<SpooledMessageId> {
        Err(SpoolError::Internal("spool is full".to_string()))
    }

    async fn list(&self) -> hermod_spool::Result<Vec<SpooledMessageId>> {
        self.inner.list().await
    }

    async fn read(&self, id: &SpooledMessageId) -> hermod_spool::Result<Envelope> {
        self.inner.read(id).await
    }

    async fn update(&self, id: &SpooledMessageId, envelope: &Envelope) -> hermod_spool::Result<()> {
        self.inner.update(id, envelope).await
    }

    async fn delete(&self, id: &SpooledMessageId) -> hermod_spool::Result<()> {
        self.inner.delete(id).await
    }

    async fn fail(&self, id: &SpooledMessageId, envelope: &Envelope) -> hermod_spool::Result<()> {
        self.inner.fail(id, envelope).await
    }

    async fn list_failed(&self) -> hermod_spool::Result<Vec<SpooledMessageId>> {
        self.inner.list_failed().await
    }

    async fn read_failed(&self, id: &SpooledMessageId) -> hermod_spool::Result<Envelope> {
        self.inner.read_failed(id).await
    }
}

struct Fixture {
    mail: TempDir,
    spool: MemoryBackingStore,
    transport: Arc<ScriptedTransport>,
    engine: DeliveryEngine,
}

fn policy() -> Arc<Policy> {
    Arc::new(
        Policy::new(&PolicyConfig {
            local_domains: vec!["local.test".to_string(), "other.test".to_string()],
            ..PolicyConfig::default()
        })
        .expect("valid policy"),
    )
}

fn users(root: &Path, default_mailbox: Option<&str>) -> Arc<StaticUserDirectory> {
    let account = |address: &str| AccountConfig {
        address: address.to_string(),
        forward: Vec::default(),
        mailbox: None,
    };

    Arc::new(
        StaticUserDirectory::new(&UsersConfig {
            mailbox_root: root.to_path_buf(),
            default_mailbox: default_mailbox.map(str::to_string),
            accounts: vec![account("bob@local.test"), account("postmaster@local.test")],
        })
        .expect("valid directory"),
    )
}

fn fixture_with(default_mailbox: Option<&str>, transport: Arc<ScriptedTransport>) -> Fixture {
    let mail = tempfile::tempdir().expect("mail root");
    let spool = MemoryBackingStore::new();
    let engine = DeliveryEngine::new(
        Arc::new(spool.clone()),
        policy(),
        users(mail.path(), default_mailbox),
        transport.clone(),
        10,
    );

    Fixture {
        mail,
        spool,
        transport,
        engine,
    }
}

fn fixture() -> Fixture {
    fixture_with(None, Arc::new(ScriptedTransport::default()))
}

fn message(sender: &str, recipients: &[&str]) -> Envelope {
    Envelope::new(
        Address::parse(sender),
        recipients.iter().map(|r| Address::parse(r)).collect(),
        vec!["Subject: hi".to_string(), String::new(), "hello".to_string()],
    )
}

fn mailbox_files(mailbox: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(mailbox)
        .map(|entries| entries.map(|entry| entry.unwrap().path()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn unknown_local_user_is_bounced_once() {
    let spool_dir = tempfile::tempdir().expect("spool dir");
    let spool = FileBackingStore::builder()
        .path(spool_dir.path())
        .build()
        .expect("valid spool");
    spool.init().expect("spool initialised");
    let spool: Arc<dyn BackingStore> = Arc::new(spool);

    let mail = tempfile::tempdir().expect("mail root");
    let engine = DeliveryEngine::new(
        spool.clone(),
        policy(),
        users(mail.path(), None),
        Arc::new(ScriptedTransport::default()),
        10,
    );

    let original = spool
        .write(&message("a@b.com", &["ghost@local.test"]))
        .await
        .expect("spooled");

    let report = engine.run_cycle().await;
    assert_eq!(report.completed, 1);
    assert_eq!(report.errors, 0);

    let ids = spool.list().await.expect("listable");
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], original);

    let bounce = spool.read(&ids[0]).await.expect("bounce readable");
    assert_eq!(bounce.sender().full(), "mailer_daemon@local.test");
    assert_eq!(bounce.recipients(), &[Address::parse("a@b.com")]);
    assert_eq!(bounce.delivery_attempts(), 0);
    assert!(
        bounce
            .body()
            .contains(&"Error delivering message to: ghost@local.test".to_string())
    );
    assert!(bounce.body().ends_with(&["hello".to_string(), String::new()]));
}

#[tokio::test]
async fn local_recipients_get_a_mailbox_file() {
    let fixture = fixture();
    fixture
        .spool
        .write(&message("alice@example.com", &["BOB@local.test"]))
        .await
        .expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(
        report,
        CycleReport {
            scanned: 1,
            completed: 1,
            ..CycleReport::default()
        }
    );
    assert!(fixture.spool.is_empty());

    let files = mailbox_files(&fixture.mail.path().join("bob@local.test"));
    assert_eq!(files.len(), 1);
    assert_eq!(
        std::fs::read_to_string(&files[0]).expect("readable"),
        "X-DeliveredTo: bob@local.test\r\nSubject: hi\r\n\r\nhello\r\n"
    );
    assert!(fixture.transport.sent().is_empty());
}

#[tokio::test]
async fn default_mailbox_catches_unknown_users() {
    let fixture = fixture_with(
        Some("postmaster@local.test"),
        Arc::new(ScriptedTransport::default()),
    );
    fixture
        .spool
        .write(&message("alice@example.com", &["ghost@local.test"]))
        .await
        .expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(report.completed, 1);
    assert!(fixture.spool.is_empty());

    let files = mailbox_files(&fixture.mail.path().join("postmaster@local.test"));
    assert_eq!(files.len(), 1);
    assert!(
        std::fs::read_to_string(&files[0])
            .expect("readable")
            .starts_with("X-DeliveredTo: ghost@local.test\r\n")
    );
}

#[tokio::test]
async fn unresolvable_default_mailbox_is_not_found() {
    let fixture = fixture_with(
        Some("nobody@local.test"),
        Arc::new(ScriptedTransport::default()),
    );
    fixture
        .spool
        .write(&message("alice@example.com", &["ghost@local.test"]))
        .await
        .expect("spooled");

    fixture.engine.run_cycle().await;

    let remaining = fixture.spool.envelopes();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].is_bounce_suppressed());
    assert_eq!(remaining[0].recipients(), &[Address::parse("alice@example.com")]);
}

#[tokio::test]
async fn remote_recipients_go_through_the_transport() {
    let fixture = fixture();
    fixture
        .spool
        .write(&message("bob@local.test", &["carol@remote.test", "dave@remote.test"]))
        .await
        .expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(report.completed, 1);
    assert_eq!(
        fixture.transport.sent(),
        vec!["carol@remote.test", "dave@remote.test"]
    );
    assert!(fixture.spool.is_empty());
}

#[tokio::test]
async fn transient_failures_are_rescheduled_with_only_failed_recipients() {
    let fixture = fixture_with(
        None,
        ScriptedTransport::failing(
            "carol@remote.test",
            TransportError::Failed("connection refused".to_string()),
        ),
    );
    let id = fixture
        .spool
        .write(&message("alice@example.com", &["bob@local.test", "carol@remote.test"]))
        .await
        .expect("spooled");

    let before = Utc::now();
    let report = fixture.engine.run_cycle().await;
    let after = Utc::now();

    assert_eq!(report.rescheduled, 1);
    let pending = fixture.spool.read(&id).await.expect("still spooled");
    assert_eq!(pending.recipients(), &[Address::parse("carol@remote.test")]);
    assert_eq!(pending.delivery_attempts(), 1);
    assert!(pending.scheduled_delivery() >= before + TimeDelta::minutes(1));
    assert!(pending.scheduled_delivery() <= after + TimeDelta::minutes(1));
    assert_eq!(mailbox_files(&fixture.mail.path().join("bob@local.test")).len(), 1);

    let report = fixture.engine.run_cycle().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(fixture.transport.sent(), vec!["carol@remote.test"]);
}

#[tokio::test]
async fn backoff_grows_with_previous_attempts() {
    let fixture = fixture_with(
        None,
        ScriptedTransport::failing(
            "carol@remote.test",
            TransportError::Failed("timed out".to_string()),
        ),
    );
    let mut envelope = message("alice@example.com", &["carol@remote.test"]);
    envelope.set_delivery_attempts(4);
    let id = fixture.spool.write(&envelope).await.expect("spooled");

    let before = Utc::now();
    fixture.engine.run_cycle().await;
    let after = Utc::now();

    let pending = fixture.spool.read(&id).await.expect("still spooled");
    assert_eq!(pending.delivery_attempts(), 5);
    assert!(pending.scheduled_delivery() >= before + TimeDelta::minutes(16));
    assert!(pending.scheduled_delivery() <= after + TimeDelta::minutes(16));
}

#[tokio::test]
async fn exhausted_records_bounce_each_failed_recipient() {
    let transport = ScriptedTransport::failing(
        "carol@remote.test",
        TransportError::Failed("connection refused".to_string()),
    );
    transport.script.lock().unwrap().insert(
        "dave@remote.test".to_string(),
        TransportError::Failed("connection refused".to_string()),
    );
    let fixture = fixture_with(None, transport);

    let mut envelope = message(
        "alice@example.com",
        &["carol@remote.test", "dave@remote.test", "erin@remote.test"],
    );
    envelope.set_delivery_attempts(10);
    let id = fixture.spool.write(&envelope).await.expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(report.exhausted, 1);
    assert!(matches!(
        fixture.spool.read(&id).await,
        Err(SpoolError::NotFound(_))
    ));

    let bounces = fixture.spool.envelopes();
    assert_eq!(bounces.len(), 2);
    let mut reported: Vec<&String> = bounces
        .iter()
        .flat_map(|bounce| bounce.body().iter())
        .filter(|line| line.starts_with("Error delivering message to:"))
        .collect();
    reported.sort();
    assert_eq!(
        reported,
        vec![
            "Error delivering message to: carol@remote.test",
            "Error delivering message to: dave@remote.test",
        ]
    );
    assert!(
        bounces
            .iter()
            .all(|bounce| bounce.recipients() == [Address::parse("alice@example.com")].as_slice())
    );
}

#[tokio::test]
async fn failed_bounces_are_dead_lettered() {
    let fixture = fixture_with(
        None,
        ScriptedTransport::failing(
            "alice@example.com",
            TransportError::Failed("connection refused".to_string()),
        ),
    );
    let id = fixture
        .spool
        .write(&message("MAILER_DAEMON@local.test", &["alice@example.com"]))
        .await
        .expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(report.dead_lettered, 1);
    assert!(fixture.spool.is_empty());
    assert_eq!(fixture.spool.list_failed().await.expect("listable"), vec![id]);
    let failed = fixture.spool.read_failed(&id).await.expect("readable");
    assert_eq!(failed.delivery_attempts(), 0);
}

#[tokio::test]
async fn bounces_are_never_bounced() {
    let fixture = fixture_with(
        None,
        ScriptedTransport::failing(
            "alice@example.com",
            TransportError::RecipientNotFound("550 no such user".to_string()),
        ),
    );
    let id = fixture
        .spool
        .write(&message("mailer_daemon@local.test", &["alice@example.com"]))
        .await
        .expect("spooled");

    fixture.engine.run_cycle().await;

    assert!(fixture.spool.is_empty());
    assert_eq!(fixture.spool.list_failed().await.expect("listable"), vec![id]);
}

#[tokio::test]
async fn remote_rejections_bounce_immediately() {
    let fixture = fixture_with(
        None,
        ScriptedTransport::failing(
            "ghost@remote.test",
            TransportError::RecipientNotFound("550 no such user".to_string()),
        ),
    );
    let id = fixture
        .spool
        .write(&message("bob@local.test", &["ghost@remote.test"]))
        .await
        .expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(report.completed, 1);
    assert!(matches!(
        fixture.spool.read(&id).await,
        Err(SpoolError::NotFound(_))
    ));
    let bounces = fixture.spool.envelopes();
    assert_eq!(bounces.len(), 1);
    assert_eq!(bounces[0].recipients(), &[Address::parse("bob@local.test")]);
}

#[tokio::test]
async fn unstorable_bounces_keep_the_recipient() {
    let spool = Arc::new(NoNewRecords::default());
    let mail = tempfile::tempdir().expect("mail root");
    let engine = DeliveryEngine::new(
        spool.clone(),
        policy(),
        users(mail.path(), None),
        Arc::new(ScriptedTransport::default()),
        10,
    );
    let id = spool
        .inner
        .write(&message("alice@example.com", &["ghost@local.test"]))
        .await
        .expect("spooled");

    let report = engine.run_cycle().await;

    assert_eq!(report.rescheduled, 1);
    let pending = spool.read(&id).await.expect("still spooled");
    assert_eq!(pending.recipients(), &[Address::parse("ghost@local.test")]);
    assert_eq!(pending.delivery_attempts(), 1);
}

#[tokio::test]
async fn future_records_are_left_alone() {
    let fixture = fixture();
    let mut envelope = message("alice@example.com", &["carol@remote.test"]);
    envelope.schedule(Utc::now() + TimeDelta::hours(1));
    let id = fixture.spool.write(&envelope).await.expect("spooled");

    let report = fixture.engine.run_cycle().await;

    assert_eq!(
        report,
        CycleReport {
            scanned: 1,
            skipped: 1,
            ..CycleReport::default()
        }
    );
    assert!(fixture.transport.sent().is_empty());
    assert_eq!(fixture.spool.read(&id).await.expect("untouched"), {
        let mut expected = envelope;
        expected.set_location(id.to_string());
        expected
    });
}

#[tokio::test]
async fn empty_spool_cycles_do_nothing() {
    let fixture = fixture();

    assert_eq!(fixture.engine.run_cycle().await, CycleReport::default());
    assert_eq!(fixture.engine.run_cycle().await, CycleReport::default());
    assert!(fixture.spool.is_empty());
}

#[tokio::test]
async fn processor_stops_on_shutdown() {
    let mail = tempfile::tempdir().expect("mail root");
    let spool = MemoryBackingStore::new();
    spool
        .write(&message("alice@example.com", &["bob@local.test"]))
        .await
        .expect("spooled");

    let mut processor: DeliveryProcessor =
        ron::from_str("(scan_interval_secs: 3600, max_sleep_slice_secs: 1)").expect("config");
    processor
        .init_with_transport(
            Arc::new(spool.clone()),
            policy(),
            users(mail.path(), None),
            Arc::new(ScriptedTransport::default()),
        )
        .expect("initialised");

    let (shutdown, receiver) = broadcast::channel(1);
    let serving = tokio::spawn(async move { processor.serve(receiver).await });

    while !spool.is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.send(Signal::Shutdown).expect("processor listening");

    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("processor stopped promptly")
        .expect("task joined")
        .expect("clean exit");

    assert_eq!(mailbox_files(&mail.path().join("bob@local.test")).len(), 1);
}

#[tokio::test]
async fn zero_intervals_are_rejected() {
    let mail = tempfile::tempdir().expect("mail root");
    let mut processor: DeliveryProcessor =
        ron::from_str("(scan_interval_secs: 0)").expect("config");

    let result = processor.init_with_transport(
        Arc::new(MemoryBackingStore::new()),
        policy(),
        users(mail.path(), None),
        Arc::new(ScriptedTransport::default()),
    );

    assert!(result.is_err());
    assert!(processor.engine().is_none());
}
