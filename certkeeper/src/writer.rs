//! Publishing certificate bundles to the key/value store

use crate::config::Config;
use crate::etcd::{KvStore, StoreError};
use certkeeper_core::{CertificateBundle, store_key};
use futures::future::join_all;
use std::path::Path;

/// Publish every bundle.
///
/// All writes are attempted even when some fail; the result reports how many
/// bundles could not be published.
pub async fn write_certs(
    config: &Config,
    store: &dyn KvStore,
    certs: &[CertificateBundle],
) -> Result<(), StoreError> {
    let results = join_all(certs.iter().map(|cert| write_cert(config, store, cert))).await;
    collect_failures(results)
}

/// Publish the three artifacts of one bundle.
pub async fn write_cert(
    config: &Config,
    store: &dyn KvStore,
    cert: &CertificateBundle,
) -> Result<(), StoreError> {
    let writes = cert.artifacts().map(|(kind, path)| {
        let key = store_key(&config.namespace, &config.base, &cert.domain, kind);
        async move { write(store, &key, path).await }
    });
    let results = join_all(writes).await;

    collect_failures(results).inspect_err(|e| {
        tracing::error!(
            domain = %cert.domain,
            "Error writing certs to etcd for subdomain: {}",
            e
        )
    })
}

/// Write `source` under `key`: file contents when the path exists, otherwise
/// the literal string.
async fn write(store: &dyn KvStore, key: &str, source: &Path) -> Result<(), StoreError> {
    let value = if source.exists() {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| StoreError::Read {
                path: source.display().to_string(),
                source: e,
            })?
    } else {
        source.display().to_string()
    };
    store.set(key, &value).await
}

fn collect_failures(results: Vec<Result<(), StoreError>>) -> Result<(), StoreError> {
    let total = results.len();
    let mut failures = results.into_iter().filter_map(Result::err);
    let Some(first) = failures.next() else {
        return Ok(());
    };
    Err(StoreError::Partial {
        failed: 1 + failures.count(),
        total,
        first: Box::new(first),
    })
}
