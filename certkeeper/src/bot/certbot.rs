//! Certificate issuance through certbot's webroot plugin

use crate::config::Config;
use crate::exec::{CommandRunner, Echo};

pub const CERTBOT: &str = "certbot";

const PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
const STAGING_DIRECTORY: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME directory URL for the configured environment
pub fn directory_url(staging: bool) -> &'static str {
    if staging {
        STAGING_DIRECTORY
    } else {
        PRODUCTION_DIRECTORY
    }
}

/// Arguments for a non-interactive `certbot certonly` run covering every
/// configured domain.
pub fn certbot_args(config: &Config) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "certonly".into(),
        "--webroot".into(),
        "--server".into(),
        directory_url(config.staging).into(),
        "-w".into(),
        config.webroot.display().to_string(),
        "-n".into(),
        "--agree-tos".into(),
        "--http-01-port".into(),
        config.port.to_string(),
        "--email".into(),
        config.email.clone(),
        "--no-self-upgrade".into(),
    ];
    for domain in &config.domains {
        args.push("-d".into());
        args.push(domain.clone());
    }
    args
}

/// Run certbot. Failures are logged and reported as `false`.
pub async fn run_certbot(config: &Config, exec: &dyn CommandRunner) -> bool {
    let args = certbot_args(config);
    tracing::info!(
        domains = %config.domains.join(", "),
        staging = config.staging,
        "Requesting certificates from Let's Encrypt"
    );

    match exec.exec(CERTBOT, &args, Echo::Log).await {
        Ok(_) => {
            tracing::info!("Certbot completed");
            true
        }
        Err(e) => {
            dump_certbot_log(config).await;
            tracing::error!(
                code = ?e.code(),
                "Certbot failed:\n\t{}",
                e.output().join("\n\t")
            );
            tracing::debug!("{}", e);
            false
        }
    }
}

async fn dump_certbot_log(config: &Config) {
    let path = config.certbot_log();
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => tracing::error!(
            log = %path.display(),
            "Certbot log:\n{}",
            contents
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(log = %path.display(), "No certbot log to show")
        }
        Err(e) => tracing::warn!(log = %path.display(), "Failed to read certbot log: {}", e),
    }
}
