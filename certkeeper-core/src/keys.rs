//! Distributed-store key layout
//!
//! Every artifact is written to `<namespace>/<segment>_<suffix>` where the
//! segment is derived from the domain relative to the base domain:
//!
//! - the base domain itself becomes `<base>.` (so `test.io` -> `test_io_`)
//! - other domains have the base stripped (so `www.test.io` -> `www_`)
//!
//! Dots are replaced with underscores in the segment.

use crate::bundle::ArtifactKind;

/// Key prefix for a domain, without the artifact suffix.
pub fn store_key_prefix(namespace: &str, base: &str, domain: &str) -> String {
    let segment = if domain == base {
        format!("{}.", base)
    } else {
        domain.replacen(base, "", 1)
    };
    format!("{}/{}", namespace, segment.replace('.', "_"))
}

/// Full key for one artifact of a domain.
pub fn store_key(namespace: &str, base: &str, domain: &str, kind: ArtifactKind) -> String {
    format!("{}{}", store_key_prefix(namespace, base, domain), kind.suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_domain_key_keeps_full_name() {
        assert_eq!(
            store_key("prod", "test.io", "test.io", ArtifactKind::Crt),
            "prod/test_io_crt"
        );
    }

    #[test]
    fn subdomain_key_is_relative_to_base() {
        assert_eq!(
            store_key("prod", "test.io", "www.test.io", ArtifactKind::Crt),
            "prod/www_crt"
        );
        assert_eq!(
            store_key("prod", "test.io", "www.test.io", ArtifactKind::Pem),
            "prod/www_pem"
        );
    }

    #[test]
    fn nested_subdomain_keeps_inner_dots_as_underscores() {
        assert_eq!(
            store_key("stage", "test.io", "api.eu.test.io", ArtifactKind::Key),
            "stage/api_eu_key"
        );
    }

    #[test]
    fn unrelated_domain_keeps_its_name() {
        assert_eq!(store_key_prefix("prod", "test.io", "other.org"), "prod/other_org");
    }
}
