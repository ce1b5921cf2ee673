#![allow(dead_code)]

//! In-memory stand-ins for the workflow collaborators

use async_trait::async_trait;
use certkeeper::bucket::{ArchiveHandle, BucketError, ObjectStore};
use certkeeper::challenge::{
    ChallengeError, ManagedProcess, ProcessEvent, ProcessHost, ProcessSpec, ProcessState,
};
use certkeeper::config::Config;
use certkeeper::etcd::{KvStore, StoreError};
use certkeeper::exec::{CommandRunner, Echo, ExecError};
use certkeeper_core::ArtifactKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Log sink for asserting on what a workflow traced
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    /// Acquisition stages in the order they were entered.
    pub fn stages(&self) -> Vec<String> {
        let raw = self.0.lock().unwrap();
        String::from_utf8_lossy(&raw)
            .lines()
            .filter(|line| line.contains("Acquisition stage"))
            .filter_map(|line| line.rsplit("stage=").next())
            .map(|stage| stage.trim().to_string())
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub const BASE: &str = "test.io";

pub fn domains() -> Vec<String> {
    vec!["test.io".to_string(), "www.test.io".to_string()]
}

/// Configuration rooted at `cert_path` with no post-start wait.
pub fn config(cert_path: &Path) -> Config {
    let mut config = Config::new(BASE, domains());
    config.cert_path = cert_path.to_path_buf();
    config.namespace = "prod".to_string();
    config.email = "ops@test.io".to_string();
    config.etcd = "http://127.0.0.1:2379".to_string();
    config.bucket = Some("certs".to_string());
    config.country = "US".to_string();
    config.state = "CA".to_string();
    config.local = "SF".to_string();
    config.organization = "Acme".to_string();
    config.unit = "Ops".to_string();
    config.wait = 0;
    config
}

/// Write the three artifacts into `dir`.
pub fn write_bundle(dir: &Path, body: &str) {
    std::fs::create_dir_all(dir).unwrap();
    for kind in ArtifactKind::ALL {
        std::fs::write(dir.join(kind.file_name()), format!("{} {}", body, kind.suffix())).unwrap();
    }
}

/// A valid backup archive built in `scratch`.
pub fn valid_archive(scratch: &Path) -> PathBuf {
    let src = scratch.join("bundle");
    write_bundle(&src, "archived");
    let archive = scratch.join("certs.tgz");
    certkeeper::archive::pack(
        &src,
        &["cert.pem", "privkey.pem", "fullchain.pem"],
        &archive,
    )
    .unwrap();
    archive
}

#[derive(Default)]
pub struct FakeObjectStore {
    /// Archive returned by downloads; `None` means the bucket is empty.
    pub archive: Option<PathBuf>,
    pub fail_upload: bool,
    pub downloads: AtomicUsize,
    pub uploads: Mutex<Vec<PathBuf>>,
}

impl FakeObjectStore {
    pub fn with_archive(archive: PathBuf) -> Self {
        Self {
            archive: Some(archive),
            ..Default::default()
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn download_file(&self, config: &Config) -> Result<Option<ArchiveHandle>, BucketError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let Some(source) = &self.archive else {
            return Ok(None);
        };
        let dir = config.base_cert_dir();
        std::fs::create_dir_all(&dir)?;
        let target = dir.join("certs.tgz");
        std::fs::copy(source, &target)?;
        Ok(Some(ArchiveHandle::for_file(target)))
    }

    async fn upload_file(&self, _config: &Config, file: &Path) -> Result<ArchiveHandle, BucketError> {
        if self.fail_upload {
            return Err(BucketError::Auth("upload refused".to_string()));
        }
        self.uploads.lock().unwrap().push(file.to_path_buf());
        Ok(ArchiveHandle::for_file(file))
    }
}

#[derive(Default)]
pub struct FakeKv {
    pub values: Mutex<BTreeMap<String, String>>,
    pub reject: Option<String>,
    /// Challenge server stop count observed at each write
    pub stops: Option<Arc<AtomicUsize>>,
    pub stops_seen: Mutex<Vec<usize>>,
}

impl FakeKv {
    pub fn write_count(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl KvStore for FakeKv {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(stops) = &self.stops {
            self.stops_seen
                .lock()
                .unwrap()
                .push(stops.load(Ordering::SeqCst));
        }
        if self.reject.as_deref() == Some(key) {
            return Err(StoreError::Rejected {
                key: key.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".to_string(),
            });
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Pretends to be certbot and openssl.
///
/// A successful certbot run writes a bundle into `issue_into`; openssl writes
/// the `-keyout`/`-out` files it is given.
#[derive(Default)]
pub struct FakeRunner {
    pub issue_into: Option<PathBuf>,
    pub fail_certbot: bool,
    /// Domain whose openssl run fails
    pub fail_domain: Option<String>,
    pub calls: Mutex<Vec<(String, Vec<String>, Echo)>>,
}

impl FakeRunner {
    pub fn calls_to(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| c == command)
            .count()
    }

    fn failure(command: &str, args: &[String], line: &str) -> ExecError {
        ExecError::Failed {
            command: command.to_string(),
            args: args.to_vec(),
            code: Some(1),
            output: vec![line.to_string()],
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let pos = args.iter().position(|a| a == flag)?;
        args.get(pos + 1).map(String::as_str)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn exec(&self, command: &str, args: &[String], echo: Echo) -> Result<Vec<String>, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec(), echo));

        match command {
            "certbot" => {
                if self.fail_certbot {
                    return Err(Self::failure(command, args, "Challenge failed"));
                }
                if let Some(dir) = &self.issue_into {
                    assert!(!dir.exists(), "certificate folder must be cleared before issuance");
                    write_bundle(dir, "issued");
                }
                Ok(vec!["Congratulations!".to_string()])
            }
            "openssl" => {
                let subject = Self::arg_after(args, "-subj").unwrap_or_default();
                if let Some(domain) = &self.fail_domain {
                    if subject.contains(&format!("/CN={}/", domain)) {
                        return Err(Self::failure(command, args, "unable to write key"));
                    }
                }
                let key = Self::arg_after(args, "-keyout").expect("-keyout");
                let crt = Self::arg_after(args, "-out").expect("-out");
                std::fs::write(key, "KEY\n").unwrap();
                std::fs::write(crt, "CERT\n").unwrap();
                Ok(Vec::new())
            }
            other => Err(ExecError::Spawn {
                command: other.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

/// Process host whose processes only count lifecycle calls
#[derive(Default)]
pub struct FakeProcessHost {
    pub fail_create: bool,
    pub fail_start: bool,
    pub crash_after_start: bool,
    pub creates: AtomicUsize,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub specs: Mutex<Vec<ProcessSpec>>,
}

#[async_trait]
impl ProcessHost for FakeProcessHost {
    async fn create(
        &self,
        kind: &str,
        spec: ProcessSpec,
    ) -> Result<Box<dyn ManagedProcess>, ChallengeError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(ChallengeError::CommandNotFound(spec.command));
        }
        self.specs.lock().unwrap().push(spec);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Box::new(FakeProcess {
            kind: kind.to_string(),
            state: ProcessState::Created,
            fail_start: self.fail_start,
            crash_after_start: self.crash_after_start,
            starts: self.starts.clone(),
            stops: self.stops.clone(),
            events_tx,
            events_rx: Some(events_rx),
        }))
    }
}

pub struct FakeProcess {
    kind: String,
    state: ProcessState,
    fail_start: bool,
    crash_after_start: bool,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    async fn start(&mut self) -> Result<(), ChallengeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            self.state = ProcessState::Failed;
            return Err(ChallengeError::Failed(
                self.kind.clone(),
                "exit status: 1".to_string(),
            ));
        }
        self.state = ProcessState::Running;
        let _ = self
            .events_tx
            .send(ProcessEvent::Stdout("Serving HTTP".to_string()));
        if self.crash_after_start {
            let _ = self
                .events_tx
                .send(ProcessEvent::Crashed("exit status: 1".to_string()));
        }
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        self.events_rx.take()
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.state != ProcessState::Failed {
            self.state = ProcessState::Stopped;
        }
    }
}
